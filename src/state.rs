use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::store::RateStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn RateStore>,
    rate_interval: Duration,
    retention: Duration,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn RateStore>, config: &Config) -> Self {
        Self {
            store,
            rate_interval: config.rate_interval,
            retention: config.retention(),
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &dyn RateStore {
        self.store.as_ref()
    }

    pub fn rate_interval(&self) -> Duration {
        self.rate_interval
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
