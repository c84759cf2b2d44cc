pub(super) mod common;

mod concurrency;
mod sweeper;
