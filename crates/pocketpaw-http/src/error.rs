//! Crate-wide error type and its `axum` response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors that can surface from any HTTP handler.
#[derive(Debug, thiserror::Error)]
pub enum PocketPawError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authorization error: {0}")]
    Authorization(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("fatal error: {0}")]
    Fatal(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

/// Newtype so `PocketPawError` can implement `IntoResponse` without
/// orphan-rule trouble (neither the error nor the trait is ours otherwise).
pub struct ApiError(pub PocketPawError);

impl<E> From<E> for ApiError
where
    E: Into<PocketPawError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PocketPawError::Authorization(_) => (StatusCode::UNAUTHORIZED, "authorization"),
            PocketPawError::Configuration(_) => (StatusCode::BAD_REQUEST, "configuration"),
            PocketPawError::Policy(_) => (StatusCode::FORBIDDEN, "policy"),
            PocketPawError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport"),
            PocketPawError::Protocol(_) => (StatusCode::BAD_REQUEST, "protocol"),
            PocketPawError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            PocketPawError::Runtime(_) | PocketPawError::Fatal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
            PocketPawError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        };

        let body = Json(json!({
            "error": code,
            "message": self.0.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let PocketPawError::RateLimited { retry_after_secs } = &self.0 {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// 403 shorthand for handlers that need a bespoke message without routing
/// through a `PocketPawError` variant (e.g. scope checks in middleware).
pub fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError(PocketPawError::Policy(message.into()))
}

/// 401 shorthand, same rationale as [`forbidden`].
pub fn unauthorized(message: impl Into<String>) -> ApiError {
    ApiError(PocketPawError::Authorization(message.into()))
}
