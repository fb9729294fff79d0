//! Retrying reverse-proxy transport.
//!
//! One [`ProxyService::forward`] call executes a client's request against
//! some live backend: lease a transport slot, walk up to `max_backends`
//! backends from the balancer, dispatch up to `max_retries` fresh request
//! clones per backend, and mark a backend down once its retry budget is
//! spent. The inbound body is buffered (bounded) so every retry replays the
//! identical bytes; bodies past the cap get exactly one streamed attempt.
use std::sync::Arc;

use axum::body::{Body, Bytes};
use http::{header, request::Parts, HeaderValue, StatusCode, Uri};
use http_body_util::{BodyExt, Limited};
use thiserror::Error;

use crate::{
    adapters::pool::{PoolError, TransportLease, TransportPool},
    config::models::ProxyConfig,
    core::{
        backend::Backend,
        registry::{Balancer, SelectError},
    },
    ports::http_client::HttpClientError,
};

/// Replay buffer cap. Larger bodies are dispatched once, without retry.
const MAX_REPLAY_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("no available backends")]
    NoAvailableBackends,

    #[error("all backends failed")]
    AllBackendsFailed,

    #[error("backend returned status {0}")]
    UpstreamServerError(StatusCode),

    #[error(transparent)]
    Transport(#[from] HttpClientError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to buffer request body: {0}")]
    Body(String),
}

impl From<SelectError> for ProxyError {
    fn from(_: SelectError) -> Self {
        ProxyError::NoAvailableBackends
    }
}

pub struct ProxyService {
    balancer: Arc<dyn Balancer>,
    pool: Arc<TransportPool>,
    max_retries: usize,
    max_backends: usize,
}

impl ProxyService {
    pub fn new(balancer: Arc<dyn Balancer>, pool: Arc<TransportPool>, config: &ProxyConfig) -> Self {
        Self {
            balancer,
            pool,
            max_retries: config.max_retries,
            max_backends: config.max_backends,
        }
    }

    /// Dispose of the outbound transports. In-flight leases finish first.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Execute the request against the backend pool and stream the winning
    /// response back.
    pub async fn forward(&self, req: hyper::Request<Body>) -> Result<hyper::Response<Body>, ProxyError> {
        let lease = self.pool.acquire().await?;

        let original_host = original_host(&req);
        let (mut parts, body) = req.into_parts();
        // The outbound client frames the buffered body itself.
        parts.headers.remove(header::TRANSFER_ENCODING);

        if declared_length(&parts.headers)
            .is_some_and(|len| len > MAX_REPLAY_BODY_BYTES as u64)
        {
            return self
                .dispatch_once(&lease, parts, body, &original_host)
                .await;
        }

        let body_bytes = match Limited::new(body, MAX_REPLAY_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => return Err(ProxyError::Body(e.to_string())),
        };

        let mut last_err: Option<ProxyError> = None;

        for backend_attempt in 0..self.max_backends {
            let backend = match self.balancer.next_available() {
                Ok(backend) => backend,
                Err(e) => {
                    tracing::error!(error = %e, "failed to get backend");
                    return Err(e.into());
                }
            };

            tracing::debug!(
                backend = %backend,
                backend_attempt = backend_attempt + 1,
                "selected backend"
            );

            for retry in 0..self.max_retries {
                let outbound =
                    build_outbound(&parts, body_bytes.clone(), &backend, &original_host)?;

                tracing::debug!(
                    backend = %backend,
                    backend_attempt = backend_attempt + 1,
                    retry = retry + 1,
                    "trying backend"
                );

                match lease.transport().round_trip(outbound).await {
                    Ok(response) if response.status().as_u16() < 500 => {
                        return Ok(response);
                    }
                    Ok(response) => {
                        tracing::error!(
                            backend = %backend,
                            status = response.status().as_u16(),
                            backend_attempt = backend_attempt + 1,
                            retry = retry + 1,
                            "backend returned error"
                        );
                        last_err = Some(ProxyError::UpstreamServerError(response.status()));
                        // Dropping the response closes its body.
                    }
                    Err(e) => {
                        tracing::error!(
                            backend = %backend,
                            error = %e,
                            backend_attempt = backend_attempt + 1,
                            retry = retry + 1,
                            "request failed"
                        );
                        last_err = Some(e.into());
                    }
                }
            }

            tracing::warn!(backend = %backend, "marking backend as down");
            self.balancer.mark_down(&backend);
        }

        Err(last_err.unwrap_or(ProxyError::AllBackendsFailed))
    }

    /// Single streamed attempt for bodies too large to buffer: no retry, the
    /// first failure is surfaced as-is.
    async fn dispatch_once(
        &self,
        lease: &TransportLease<'_>,
        parts: Parts,
        body: Body,
        original_host: &str,
    ) -> Result<hyper::Response<Body>, ProxyError> {
        let backend = self.balancer.next_available()?;
        tracing::debug!(
            backend = %backend,
            "request body exceeds replay buffer, dispatching once"
        );

        let mut outbound = hyper::Request::new(body);
        *outbound.method_mut() = parts.method.clone();
        *outbound.uri_mut() = backend_uri(&parts.uri, &backend)?;
        *outbound.headers_mut() = parts.headers.clone();
        set_forwarding_headers(outbound.headers_mut(), original_host);

        let response = lease.transport().round_trip(outbound).await?;
        if response.status().as_u16() >= 500 {
            tracing::error!(
                backend = %backend,
                status = response.status().as_u16(),
                "backend returned error on non-replayable request"
            );
            return Err(ProxyError::UpstreamServerError(response.status()));
        }
        Ok(response)
    }
}

/// The host the client originally addressed, for forwarding headers.
fn original_host(req: &hyper::Request<Body>) -> String {
    if let Some(host) = req.headers().get(header::HOST).and_then(|v| v.to_str().ok()) {
        return host.to_string();
    }
    req.uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_default()
}

fn declared_length(headers: &http::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

/// Rewrite scheme and authority to the backend, keeping path and query.
fn backend_uri(original: &Uri, backend: &Backend) -> Result<Uri, ProxyError> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Uri::builder()
        .scheme(backend.scheme())
        .authority(backend.authority())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| {
            ProxyError::Transport(HttpClientError::InvalidRequest(format!(
                "failed to build outbound URI for {backend}: {e}"
            )))
        })
}

fn set_forwarding_headers(headers: &mut http::HeaderMap, original_host: &str) {
    if let Ok(value) = HeaderValue::from_str(original_host) {
        headers.insert("x-forwarded-host", value.clone());
        headers.insert("x-origin-host", value);
    }
}

/// A fresh clone of the buffered request, addressed to `backend`. The
/// original request is never dispatched directly.
fn build_outbound(
    parts: &Parts,
    body_bytes: Bytes,
    backend: &Backend,
    original_host: &str,
) -> Result<hyper::Request<Body>, ProxyError> {
    let mut outbound = hyper::Request::new(Body::from(body_bytes));
    *outbound.method_mut() = parts.method.clone();
    *outbound.uri_mut() = backend_uri(&parts.uri, backend)?;
    *outbound.headers_mut() = parts.headers.clone();
    set_forwarding_headers(outbound.headers_mut(), original_host);
    Ok(outbound)
}
