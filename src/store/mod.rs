pub mod rate;

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::constants::DEFAULT_MAX_CLOCK_SKEW_SECS;

pub use rate::{MergePolicy, Rate, Rates};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no rate recorded for timestamp {timestamp}")]
    NotFound { timestamp: i64 },
}

/// Read side of the store, as consumed by the HTTP layer.
pub trait RateStore: Send + Sync {
    /// All retained buckets ascending by timestamp, copied out under the lock.
    fn rates(&self) -> Rates;

    /// The bucket for exactly `timestamp`. A missing bucket is `NotFound`, never a zero count.
    fn rate(&self, timestamp: i64) -> Result<Rate, StoreError>;

    fn bucket_count(&self) -> usize {
        self.rates().len()
    }
}

#[derive(Debug, Default)]
struct Buckets {
    counts: BTreeMap<i64, i64>,
}

impl Buckets {
    /// Newest retained bucket. Recomputed from the map, so a sweep that empties the store
    /// also resets the retention anchor.
    fn newest(&self) -> Option<i64> {
        self.counts.keys().next_back().copied()
    }

    fn evict_before(&mut self, horizon: i64) -> usize {
        let kept = self.counts.split_off(&horizon);
        let evicted = self.counts.len();
        self.counts = kept;
        evicted
    }
}

/// In-memory, time-bucketed rate aggregate shared by every poller and request handler.
///
/// A single mutex guards the bucket map. Every operation is a short in-memory critical
/// section; callers fetch remote data before calling [`Store::ingest`].
#[derive(Debug)]
pub struct Store {
    buckets: Mutex<Buckets>,
    policy: MergePolicy,
    retention_secs: i64,
    max_skew_secs: i64,
}

impl Store {
    /// `retention` is the span of recent buckets to keep; anything shorter than one
    /// second is treated as one second.
    pub fn new(policy: MergePolicy, retention: Duration) -> Self {
        Self {
            buckets: Mutex::new(Buckets::default()),
            policy,
            retention_secs: whole_secs(retention),
            max_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
        }
    }

    /// How far past the local clock a sample may be stamped and still be accepted.
    pub fn with_max_skew(mut self, skew: Duration) -> Self {
        self.max_skew_secs = whole_secs(skew);
        self
    }

    pub fn retention_secs(&self) -> i64 {
        self.retention_secs
    }

    /// Merge `sample` into its bucket, judged against the current wall clock.
    pub fn ingest(&self, sample: Rate) -> Ingest {
        self.ingest_at(sample, Utc::now().timestamp())
    }

    /// Merge `sample` into its bucket as of unix second `now`.
    ///
    /// Samples stamped more than the allowed skew past `now` are rejected, so one bad clock
    /// cannot move the horizon. The horizon is `newest - retention`, where `newest` is the
    /// newest retained bucket or the sample itself. Samples behind it are dropped without
    /// error; late samples are expected under network jitter. Accepting a sample evicts
    /// every bucket that has fallen behind the horizon.
    pub fn ingest_at(&self, sample: Rate, now: i64) -> Ingest {
        let limit = now.saturating_add(self.max_skew_secs);
        if sample.timestamp > limit {
            tracing::warn!(
                timestamp = sample.timestamp,
                now,
                limit,
                "Rejecting future-dated rate sample"
            );
            return Ingest::Future;
        }

        let mut buckets = self.lock();

        let newest = buckets
            .newest()
            .map_or(sample.timestamp, |n| n.max(sample.timestamp))
            .min(limit);
        let horizon = newest.saturating_sub(self.retention_secs);

        if sample.timestamp < horizon {
            tracing::debug!(
                timestamp = sample.timestamp,
                horizon,
                "Dropping stale rate sample"
            );
            return Ingest::Stale;
        }

        let policy = self.policy;
        buckets
            .counts
            .entry(sample.timestamp)
            .and_modify(|count| *count = policy.merge(*count, sample.count))
            .or_insert(sample.count);

        let evicted = buckets.evict_before(horizon);
        if evicted > 0 {
            tracing::debug!(evicted, horizon, "Evicted stale buckets on ingest");
        }
        Ingest::Accepted
    }

    /// Remove every bucket strictly older than `horizon`, returning how many were removed.
    pub fn evict_older_than(&self, horizon: i64) -> usize {
        self.lock().evict_before(horizon)
    }

    pub fn len(&self) -> usize {
        self.lock().counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A poisoned guard still holds consistent data: each write applies fully or not at all.
    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What happened to one sample handed to [`Store::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Accepted,
    /// Behind the retention horizon.
    Stale,
    /// Stamped too far past the local clock.
    Future,
}

fn whole_secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX).max(1)
}

impl RateStore for Store {
    fn rates(&self) -> Rates {
        self.lock()
            .counts
            .iter()
            .map(|(&timestamp, &count)| Rate { timestamp, count })
            .collect()
    }

    fn rate(&self, timestamp: i64) -> Result<Rate, StoreError> {
        self.lock()
            .counts
            .get(&timestamp)
            .map(|&count| Rate { timestamp, count })
            .ok_or(StoreError::NotFound { timestamp })
    }

    fn bucket_count(&self) -> usize {
        self.len()
    }
}
