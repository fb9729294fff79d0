//! Request-path middleware: access logging and rate-limit admission.
//!
//! Both are composable Axum layers applied in front of the router, so every
//! request — management and proxied alike — passes through them. Admission
//! runs only when the limiter is enabled.
use std::{net::SocketAddr, pin::Pin, sync::Arc, time::Instant};

use axum::{
    extract::{ConnectInfo, Request},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::core::limiter::RateLimiter;

/// Log method, path, peer, user agent, status and latency for every request.
pub async fn access_log_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let response = next.run(req).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        remote_addr = remote_addr.as_deref().unwrap_or("-"),
        user_agent = user_agent.as_deref().unwrap_or("-"),
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request processed"
    );

    response
}

/// Create a cloneable admission layer bound to a limiter instance.
pub fn create_rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    header_ip: String,
) -> impl Fn(Request, Next) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> + Clone {
    move |req, next| {
        let limiter = limiter.clone();
        let header_ip = header_ip.clone();
        Box::pin(async move {
            let client_id = derive_client_id(&req, &header_ip);

            if !limiter.allow(&client_id) {
                tracing::warn!(
                    client_id = %client_id,
                    path = %req.uri().path(),
                    method = %req.method(),
                    "rate limit exceeded"
                );
                return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
            }
            next.run(req).await
        })
    }
}

/// Derive the rate-limit subject for a request.
///
/// `X-API-Key` wins; then the first entry of the configured forwarded-IP
/// header; then the connection peer's address.
pub fn derive_client_id<B>(req: &http::Request<B>, header_ip: &str) -> String {
    if let Some(api_key) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !api_key.is_empty() {
            return format!("api:{api_key}");
        }
    }

    let mut ip = String::new();
    if !header_ip.is_empty() {
        if let Some(value) = req.headers().get(header_ip).and_then(|v| v.to_str().ok()) {
            if !value.is_empty() {
                ip = value.split(',').next().unwrap_or("").trim().to_string();
            }
        }
    }

    if ip.is_empty() {
        if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            ip = addr.ip().to_string();
        }
    }

    format!("ip:{ip}")
}
