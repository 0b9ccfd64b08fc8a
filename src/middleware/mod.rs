//! Request middleware: logging, rate limiting, per-request deadline.

pub mod logging;
pub mod rate_limit;

use crate::api::error::ApiError;
use axum::{extract::Request, middleware::Next, response::{IntoResponse, Response}};
use std::time::Duration;

/// Per-request deadline. A handler that exceeds it is abandoned and the
/// client receives a `timeout` error instead of waiting on a held lock.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

pub async fn request_deadline(req: Request, next: Next) -> Response {
    match tokio::time::timeout(REQUEST_DEADLINE, next.run(req)).await {
        Ok(response) => response,
        Err(_) => ApiError::Timeout.into_response(),
    }
}
