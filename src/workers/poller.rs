use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::constants::MAX_CATCH_UP_BUCKETS;
use crate::services::nozzle_client::NozzleClient;
use crate::store::{Ingest, Store};

/// Polls one nozzle address and feeds the store.
///
/// Each bucket is fetched at most once per answer: a tick that lands in an already polled
/// bucket is skipped, and a stalled poller backfills the buckets it missed.
#[derive(Debug, Clone)]
pub struct Poller {
    addr: String,
    index: usize,
    instance: Option<String>,
    interval_secs: i64,
    client: Arc<NozzleClient>,
    store: Arc<Store>,
    last_bucket: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ingested,
    NoData,
    Failed,
    /// The nozzle answered with a different bucket than the one requested.
    Mismatched,
    /// Every due bucket was already polled.
    UpToDate,
}

impl Poller {
    pub fn new(
        addr: String,
        index: usize,
        instance: Option<String>,
        interval: Duration,
        client: Arc<NozzleClient>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            addr,
            index,
            instance,
            interval_secs: i64::try_from(interval.as_secs()).unwrap_or(i64::MAX).max(1),
            client,
            store,
            last_bucket: None,
        }
    }

    /// Newest bucket this poller got a definitive answer for.
    pub fn last_bucket(&self) -> Option<i64> {
        self.last_bucket
    }

    /// Tick every interval until shutdown is signalled.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.interval_secs.unsigned_abs());
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(addr = %self.addr, index = self.index, "Poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once(Utc::now().timestamp()).await;
                }
                _ = shutdown_rx.recv() => break,
            }
        }

        tracing::info!(addr = %self.addr, index = self.index, "Poller stopped");
    }

    /// Poll every bucket that became due since the last answered one, oldest first, and
    /// return the outcome of the last attempt.
    ///
    /// A failed request stops the pass and leaves its bucket due for the next tick.
    pub async fn poll_once(&mut self, now: i64) -> PollOutcome {
        let target = previous_bucket(now, self.interval_secs);
        let first = match self.last_bucket {
            Some(last) if target <= last => {
                tracing::debug!(addr = %self.addr, index = self.index, bucket = target, "Bucket already polled");
                return PollOutcome::UpToDate;
            }
            Some(last) => {
                let oldest = target - (MAX_CATCH_UP_BUCKETS - 1) * self.interval_secs;
                if last + self.interval_secs < oldest {
                    tracing::warn!(
                        addr = %self.addr,
                        index = self.index,
                        last,
                        resume = oldest,
                        "Poller fell behind, skipping buckets"
                    );
                }
                (last + self.interval_secs).max(oldest)
            }
            None => target,
        };

        let mut outcome = PollOutcome::UpToDate;
        let mut bucket = first;
        while bucket <= target {
            outcome = self.poll_bucket(bucket).await;
            if outcome == PollOutcome::Failed {
                break;
            }
            self.last_bucket = Some(bucket);
            bucket += self.interval_secs;
        }
        outcome
    }

    /// Fetch one bucket and ingest it. Failures are logged, never propagated.
    pub async fn poll_bucket(&self, bucket: i64) -> PollOutcome {
        match self
            .client
            .fetch_rate(&self.addr, self.instance.as_deref(), bucket)
            .await
        {
            Ok(Some(rate)) if rate.timestamp != bucket => {
                tracing::warn!(
                    addr = %self.addr,
                    index = self.index,
                    bucket,
                    timestamp = rate.timestamp,
                    "Nozzle answered for a different bucket, discarding"
                );
                PollOutcome::Mismatched
            }
            Ok(Some(rate)) => {
                tracing::debug!(
                    addr = %self.addr,
                    index = self.index,
                    timestamp = rate.timestamp,
                    count = rate.count,
                    "Ingesting nozzle rate"
                );
                if self.store.ingest(rate) != Ingest::Accepted {
                    tracing::debug!(addr = %self.addr, index = self.index, bucket, "Store declined nozzle rate");
                }
                PollOutcome::Ingested
            }
            Ok(None) => {
                tracing::debug!(addr = %self.addr, index = self.index, bucket, "Nozzle has no data for bucket");
                PollOutcome::NoData
            }
            Err(e) => {
                tracing::warn!(addr = %self.addr, index = self.index, bucket, error = %e, "Nozzle poll failed");
                PollOutcome::Failed
            }
        }
    }
}

/// Start of the last complete bucket before `now`.
pub fn previous_bucket(now: i64, interval_secs: i64) -> i64 {
    now.div_euclid(interval_secs) * interval_secs - interval_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previous_bucket_aligns_to_interval() {
        assert_eq!(previous_bucket(125, 60), 60);
        assert_eq!(previous_bucket(120, 60), 60);
        assert_eq!(previous_bucket(119, 60), 0);
        assert_eq!(previous_bucket(1000, 1), 999);
    }
}
