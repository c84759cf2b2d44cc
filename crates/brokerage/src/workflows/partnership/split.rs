use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::domain::BrokerId;

/// Allowed drift from an even 100% when summing a split.
pub const SPLIT_TOLERANCE: f64 = 0.01;

/// Absorbs binary rounding so a total of exactly 100 ± 0.01 in decimal still passes.
const ROUNDING_SLACK: f64 = 1e-9;

/// Whether `total` is 100 within [`SPLIT_TOLERANCE`], bounds included.
pub fn totals_one_hundred(total: f64) -> bool {
    (total - 100.0).abs() <= SPLIT_TOLERANCE + ROUNDING_SLACK
}

/// Reasons a commission split is refused at construction time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SplitError {
    #[error("commission split must name at least one broker")]
    Empty,
    #[error("commission for {broker} is not a finite number")]
    NotFinite { broker: BrokerId },
    #[error("commission for {broker} must be between 0 and 100 (found {value})")]
    OutOfRange { broker: BrokerId, value: f64 },
    #[error("commission split must total 100% (found {total:.2}%)")]
    SumMismatch { total: f64 },
}

/// Broker to percentage mapping that always totals 100 within [`SPLIT_TOLERANCE`].
///
/// Iteration is ordered by broker id, which is also the order partner roles are
/// handed out in when a partnership is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<BrokerId, f64>",
    into = "BTreeMap<BrokerId, f64>"
)]
pub struct CommissionSplit(BTreeMap<BrokerId, f64>);

impl CommissionSplit {
    pub fn new<I>(entries: I) -> Result<Self, SplitError>
    where
        I: IntoIterator<Item = (BrokerId, f64)>,
    {
        let shares: BTreeMap<BrokerId, f64> = entries.into_iter().collect();
        if shares.is_empty() {
            return Err(SplitError::Empty);
        }

        for (broker, value) in &shares {
            if !value.is_finite() {
                return Err(SplitError::NotFinite {
                    broker: broker.clone(),
                });
            }
            if !(0.0..=100.0).contains(value) {
                return Err(SplitError::OutOfRange {
                    broker: broker.clone(),
                    value: *value,
                });
            }
        }

        let total: f64 = shares.values().sum();
        if !totals_one_hundred(total) {
            return Err(SplitError::SumMismatch { total });
        }

        Ok(Self(shares))
    }

    pub fn percent_for(&self, broker: &BrokerId) -> Option<f64> {
        self.0.get(broker).copied()
    }

    pub fn contains(&self, broker: &BrokerId) -> bool {
        self.0.contains_key(broker)
    }

    pub fn brokers(&self) -> impl Iterator<Item = &BrokerId> {
        self.0.keys()
    }

    pub fn broker_set(&self) -> BTreeSet<BrokerId> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BrokerId, f64)> {
        self.0.iter().map(|(broker, value)| (broker, *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Two splits are the same terms when they name the same brokers with the same shares.
    pub fn same_terms(&self, other: &CommissionSplit) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|(broker, value)| {
                other
                    .percent_for(broker)
                    .is_some_and(|theirs| (theirs - value).abs() <= f64::EPSILON)
            })
    }
}

impl TryFrom<BTreeMap<BrokerId, f64>> for CommissionSplit {
    type Error = SplitError;

    fn try_from(value: BTreeMap<BrokerId, f64>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommissionSplit> for BTreeMap<BrokerId, f64> {
    fn from(value: CommissionSplit) -> Self {
        value.0
    }
}
