use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for outbound HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for outbound HTTP operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for dispatching HTTP requests to
/// backends.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Dispatch one request and return the backend's response.
    ///
    /// Response streaming begins once headers arrive; body bytes flow through
    /// untouched.
    async fn round_trip(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;

    /// Probe a URL with a GET bounded by `timeout`.
    ///
    /// Returns `Ok(true)` for a `2xx` status, `Ok(false)` for any other
    /// status or a connection-level failure, and `Err` on timeout.
    async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}
