use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::extractors::TimestampPath;
use crate::response::AppError;
use crate::state::AppState;
use crate::store::{Rate, Rates};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/state", get(index))
        .route("/state/:timestamp", get(show))
}

/// Every retained bucket, ascending by timestamp.
pub async fn index(State(state): State<AppState>) -> Json<Rates> {
    Json(state.store().rates())
}

pub async fn show(
    State(state): State<AppState>,
    TimestampPath(timestamp): TimestampPath,
) -> Result<Json<Rate>, AppError> {
    Ok(Json(state.store().rate(timestamp)?))
}
