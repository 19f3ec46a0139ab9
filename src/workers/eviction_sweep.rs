use crate::store::Store;

/// Drop buckets that fell out of the retention window relative to wall-clock `now`.
///
/// Covers the case where every nozzle stops reporting and no ingest arrives to evict lazily.
pub async fn run(store: &Store, now: i64) {
    tracing::debug!("eviction_sweep: start");
    let horizon = now.saturating_sub(store.retention_secs());
    let evicted = store.evict_older_than(horizon);
    tracing::debug!(evicted, horizon, remaining = store.len(), "eviction_sweep: done");
}
