use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use rate_accumulator::config::{Config, TlsConfig, WorkerConfig};
use rate_accumulator::routes::build_router;
use rate_accumulator::state::AppState;
use rate_accumulator::store::{MergePolicy, RateStore, Store};

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<Store>,
    pub config: Config,
}

// built literally: set_var races across parallel tests
pub fn test_config(nozzle_addrs: Vec<String>) -> Config {
    Config {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        nozzle_addrs,
        rate_interval: Duration::from_secs(1),
        retention_buckets: 3600,
        merge_policy: MergePolicy::Sum,
        tls: TlsConfig::default(),
        uaa: None,
        platform: None,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        cors_origin: "*".to_string(),
        shutdown_timeout_secs: 1,
        worker: WorkerConfig {
            poll_timeout_secs: 2,
            ..WorkerConfig::default()
        },
    }
}

pub fn spawn_test_app() -> TestApp {
    let config = test_config(vec!["http://127.0.0.1:1".to_string()]);
    let store = Arc::new(Store::new(config.merge_policy, config.retention()));
    let state = AppState::new(store.clone(), &config);
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        store,
        config,
    }
}

/// Router over an arbitrary `RateStore`, for fakes.
pub fn router_with_store(store: Arc<dyn RateStore>) -> Router {
    let config = test_config(Vec::new());
    build_router(AppState::new(store, &config))
}
