use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use rate_accumulator::config::Config;
use rate_accumulator::logging::{init_tracing, LogConfig};
use rate_accumulator::response::panic_response;
use rate_accumulator::routes::build_router;
use rate_accumulator::services::nozzle_client::NozzleClient;
use rate_accumulator::state::AppState;
use rate_accumulator::store::Store;
use rate_accumulator::workers::WorkerManager;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            if init_tracing(&LogConfig::default()).is_ok() {
                tracing::error!(error = %e, "Failed to load config");
            } else {
                eprintln!("Failed to load config: {e}");
            }
            process::exit(1);
        }
    };

    let _log_guard = match init_tracing(&LogConfig::from(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {e}");
            process::exit(1);
        }
    };
    tracing::info!(
        nozzles = config.nozzle_addrs.len(),
        rate_interval_secs = config.rate_interval.as_secs(),
        retention_secs = config.retention().as_secs(),
        merge_policy = %config.merge_policy,
        platform = config.is_platform_deployed(),
        "Starting rate-accumulator"
    );

    let store = Arc::new(
        Store::new(config.merge_policy, config.retention()).with_max_skew(config.rate_interval),
    );

    let client = match NozzleClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build nozzle client");
            process::exit(1);
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let worker_manager =
        WorkerManager::new(store.clone(), client, shutdown_tx.subscribe(), &config);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker_manager.start().await {
            tracing::error!(error = %e, "Worker manager failed");
        }
    });

    let state = AppState::new(store.clone(), &config);
    let app = build_router(state)
        .layer(build_cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to start listener");
            process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(bound) => tracing::info!(addr = %bound, "Server bound"),
        Err(_) => tracing::info!(%addr, "Server bound"),
    }

    let mut drain_rx = shutdown_tx.subscribe();
    let server = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()));
    let mut server_handle = tokio::spawn(async move { server.await });

    let drain_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let served = tokio::select! {
        res = &mut server_handle => Some(res),
        _ = drain_rx.recv() => {
            match tokio::time::timeout(drain_timeout, &mut server_handle).await {
                Ok(res) => Some(res),
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = drain_timeout.as_secs(),
                        "Graceful drain timed out, forcing close"
                    );
                    server_handle.abort();
                    None
                }
            }
        }
    };

    match served {
        Some(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server crashed"),
        Some(Err(e)) => tracing::error!(error = %e, "HTTP server task panicked"),
        Some(Ok(Ok(()))) | None => {}
    }

    // stop the pollers even when the server exited on its own
    let _ = shutdown_tx.send(());
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Worker task panicked");
    }

    tracing::info!(buckets = store.len(), "Shutdown complete");
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.cors_origin.trim() == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .allow_methods(Any);
    }

    match config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
            .allow_methods(Any),
        Err(e) => {
            tracing::error!(origin = %config.cors_origin, error = %e, "Invalid CORS_ORIGIN");
            process::exit(1);
        }
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
