//! Configuration data structures for switchboard.
//!
//! These types map directly to the YAML (also JSON / TOML) configuration
//! document. They are serde-friendly and carry defaults so minimal configs
//! stay concise. Duration fields accept human-readable values (`10s`, `5m`,
//! `1h30m`) via `humantime_serde`.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deployment environment, selects the logging flavor.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    /// Pretty console logs at debug level.
    #[default]
    Local,
    /// JSON logs at info level.
    Prod,
}

/// Top-level application configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub env: Env,
    pub httpserver: HttpServerConfig,
    pub backends: Vec<BackendConfig>,
    pub health_checker: HealthCheckerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub storage: StorageConfig,
    pub proxy: ProxyConfig,
}

/// Inbound HTTP listener settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpServerConfig {
    pub port: u16,
    /// Per-request deadline applied to the whole exchange.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep-alive idle window for inbound connections.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// A single upstream origin.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
}

/// Active health probing settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckerConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub health_path: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            health_path: "/health".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Per-client token-bucket limiter settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub default_capacity: f64,
    pub default_rate: f64,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub bucket_ttl: Duration,
    /// Header carrying the original client IP (e.g. `X-Forwarded-For`).
    /// Empty disables header-based client identification.
    pub header_ip: String,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_capacity: 100.0,
            default_rate: 10.0,
            cleanup_interval: Duration::from_secs(10 * 60),
            bucket_ttl: Duration::from_secs(60 * 60),
            header_ip: String::new(),
        }
    }
}

/// Durable bucket state location.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub file_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file_path: "data/buckets.json".to_string(),
        }
    }
}

/// Retrying transport settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    pub proxy_transport_options: TransportOptions,
    /// Dispatch attempts per backend before it is marked down.
    pub max_retries: usize,
    /// Distinct backends tried per request.
    pub max_backends: usize,
    /// Number of reusable outbound transports.
    pub connection_pool_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy_transport_options: TransportOptions::default(),
            max_retries: 2,
            max_backends: 2,
            connection_pool_size: 10,
        }
    }
}

/// Per-phase timeouts and idle-connection caps for outbound transports.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransportOptions {
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub tls_handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub response_header_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub expect_continue_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_conn_timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            tls_handshake_timeout: Duration::from_secs(5),
            response_header_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
            idle_conn_timeout: Duration::from_secs(90),
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
        }
    }
}
