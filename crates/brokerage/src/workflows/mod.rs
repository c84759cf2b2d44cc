pub mod partnership;
