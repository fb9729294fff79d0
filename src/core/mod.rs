pub mod backend;
pub mod bucket;
pub mod limiter;
pub mod registry;

pub use backend::Backend;
pub use bucket::TokenBucket;
pub use limiter::RateLimiter;
pub use registry::{Balancer, RandomBalancer, RoundRobinBalancer, SelectError};
