/// Sampling interval in seconds. Must match the interval the nozzles bucket by.
pub const DEFAULT_RATE_INTERVAL_SECS: u64 = 60;

/// Buckets kept per series. Retention window = interval × buckets.
pub const DEFAULT_RETENTION_BUCKETS: u32 = 60;

/// Graceful drain bound for the HTTP listener.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Per-request timeout for nozzle polls.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 10;

/// Wall-clock eviction sweep: second zero of every minute.
pub const DEFAULT_EVICTION_CRON: &str = "0 * * * * *";

/// Routes a request to one instance of a platform application: `{app_guid}:{index}`.
pub const APP_INSTANCE_HEADER: &str = "X-CF-APP-INSTANCE";

/// Refresh cached bearer tokens this long before they expire.
pub const TOKEN_EXPIRY_MARGIN_SECS: u64 = 30;

/// Samples stamped further than this past the local clock are rejected by the store.
/// Overridden with the rate interval at startup.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Upper bound on missed buckets a poller backfills after a stall.
pub const MAX_CATCH_UP_BUCKETS: i64 = 10;
