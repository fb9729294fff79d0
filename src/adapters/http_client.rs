use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{header, header::HeaderValue, Request, Response, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::models::TransportOptions,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Outbound HTTP transport using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// One adapter instance corresponds to one reusable transport slot of the
/// connection pool. The configured phases map onto the client as follows:
/// dial timeout on the connector, idle-connection window and per-host cap on
/// the pool, and the response-header timeout as the deadline for the whole
/// round-trip up to headers (TLS handshake and expect-continue included).
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    response_header_timeout: Duration,
}

impl HttpClientAdapter {
    /// Build one transport with the configured timeouts and idle caps.
    pub fn new(options: &TransportOptions) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(options.dial_timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(options.idle_conn_timeout)
            .pool_max_idle_per_host(options.max_idle_conns_per_host)
            .build::<_, Body>(https_connector);

        Ok(Self {
            client,
            response_header_timeout: options.response_header_timeout,
        })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn round_trip(&self, req: Request<Body>) -> HttpClientResult<Response<Body>> {
        let (mut parts, body) = req.into_parts();

        // Host header must match the target authority
        let Some(authority) = parts.uri.authority() else {
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        };
        match HeaderValue::from_str(authority.as_str()) {
            Ok(value) => {
                parts.headers.insert(header::HOST, value);
            }
            Err(e) => {
                return Err(HttpClientError::InvalidRequest(format!(
                    "Invalid authority '{authority}': {e}"
                )));
            }
        }

        // ALPN negotiates the actual version; request as HTTP/1.1
        parts.version = Version::HTTP_11;

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        tracing::debug!(%method, %uri, "dispatching outbound request");

        let outgoing = Request::from_parts(parts, body);
        match timeout(self.response_header_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                let (mut parts, incoming) = response.into_parts();
                // The body is re-framed downstream; drop the upstream framing
                // header so the two never disagree.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, Body::new(incoming)))
            }
            Ok(Err(e)) => Err(HttpClientError::ConnectionError(format!(
                "Request to {method} {uri} failed: {e}"
            ))),
            Err(_) => Err(HttpClientError::Timeout(self.response_header_timeout)),
        }
    }

    async fn probe(&self, url: &str, timeout_duration: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(Body::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(timeout_duration, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let is_healthy = response.status().is_success();
                // Consume the body so the connection can be reused
                let _ = response.into_body().collect().await;
                tracing::debug!(url, is_healthy, "probe completed");
                Ok(is_healthy)
            }
            Ok(Err(err)) => {
                tracing::debug!(url, error = %err, "probe connection error");
                Ok(false)
            }
            Err(_) => {
                tracing::debug!(url, "probe timed out");
                Err(HttpClientError::Timeout(timeout_duration))
            }
        }
    }
}
