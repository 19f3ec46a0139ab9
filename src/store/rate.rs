use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One aggregated bucket: the event count observed for a unix-second timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rate {
    pub timestamp: i64,
    pub count: i64,
}

impl Rate {
    pub fn new(timestamp: i64, count: i64) -> Self {
        Self { timestamp, count }
    }
}

/// Snapshot of retained buckets, ascending by timestamp.
pub type Rates = Vec<Rate>;

/// How a sample is folded into a bucket that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Each nozzle reports a partial count for the bucket.
    #[default]
    Sum,
    /// Last write wins.
    Replace,
}

impl MergePolicy {
    pub fn merge(self, existing: i64, incoming: i64) -> i64 {
        match self {
            Self::Sum => existing.saturating_add(incoming),
            Self::Replace => incoming,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown merge policy: {0}")]
pub struct UnknownMergePolicy(pub String);

impl FromStr for MergePolicy {
    type Err = UnknownMergePolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "replace" | "last" | "last_write_wins" => Ok(Self::Replace),
            other => Err(UnknownMergePolicy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_saturates() {
        assert_eq!(MergePolicy::Sum.merge(3, 2), 5);
        assert_eq!(MergePolicy::Sum.merge(i64::MAX, 1), i64::MAX);
    }

    #[test]
    fn replace_keeps_incoming() {
        assert_eq!(MergePolicy::Replace.merge(3, 2), 2);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("SUM".parse::<MergePolicy>().unwrap(), MergePolicy::Sum);
        assert_eq!(" replace ".parse::<MergePolicy>().unwrap(), MergePolicy::Replace);
        assert!("max".parse::<MergePolicy>().is_err());
    }

    #[test]
    fn wire_format_is_timestamp_and_count() {
        let json = serde_json::to_string(&Rate::new(100, 5)).unwrap();
        assert_eq!(json, r#"{"timestamp":100,"count":5}"#);
    }
}
