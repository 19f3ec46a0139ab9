pub mod health;
pub mod rates;

use axum::Router;

use crate::middleware::request_id;
use crate::response::fallback_404;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(rates::router())
        .nest("/health", health::router())
        .fallback(fallback_404)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}
