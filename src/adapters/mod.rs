pub mod api;
pub mod health_checker;
pub mod http_client;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod storage;

/// Re-export commonly used types from adapters
pub use api::build_router;
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use pool::TransportPool;
pub use proxy::ProxyService;
pub use storage::FileStore;
