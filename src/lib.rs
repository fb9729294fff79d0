//! Switchboard - an HTTP reverse proxy with per-client rate limiting.
//!
//! Switchboard distributes incoming requests across a pool of backend
//! origins and enforces per-client token-bucket budgets that survive process
//! restarts. This library exposes the building blocks so you can embed the
//! proxy or compose parts of it inside your own application.
//!
//! # Features
//! - Round-robin backend selection with liveness tracking (a random strategy
//!   is available as a library alternative)
//! - Retrying transport: per-backend retry budgets, automatic down-marking,
//!   response streaming
//! - Active health checking with concurrent fire-and-forget probes
//! - Token-bucket rate limiting with lazy bucket creation, periodic refill,
//!   TTL eviction and a JSON-file durable store
//! - Management API for per-client limits (`/api/clients...`)
//! - Graceful shutdown and structured tracing throughout
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping business logic inside `core`. End users should prefer the
//! re-exports below instead of reaching into internal modules directly.
//!
//! # Error Handling
//! Fallible APIs return domain-specific error types (`thiserror`) or
//! `eyre::Result` at the application boundary.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{build_router, FileStore, HealthChecker, HttpClientAdapter, ProxyService, TransportPool},
    core::{Backend, Balancer, RandomBalancer, RateLimiter, RoundRobinBalancer, TokenBucket},
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, ShutdownToken},
};
