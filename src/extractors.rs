use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;

use crate::response::AppError;

/// Path segment that must be a non-negative integer literal.
///
/// Anything else is answered with 404, as if the route had not matched, so handlers only
/// ever see a well-formed timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPath(pub i64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for TimestampPath
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                tracing::debug!(error = %rejection, "Path extraction failed");
                AppError::not_found("Not found")
            })?;

        parse_timestamp(&raw)
            .map(TimestampPath)
            .ok_or_else(|| AppError::not_found("Not found"))
    }
}

/// Digits only, no sign, must fit in `i64`.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}
