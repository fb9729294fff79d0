//! Backend registry and selection strategies.
//!
//! The registry owns the ordered set of upstream origins plus their liveness
//! flags. [`RoundRobinBalancer`] is the production strategy: a cursor walks
//! the sequence, skipping backends marked down. [`RandomBalancer`] picks
//! uniformly over the live subset and is exported as a library alternative.
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use thiserror::Error;

use crate::core::backend::Backend;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SelectError {
    #[error("no available backends")]
    NoAvailableBackends,
}

/// Interface shared by selection strategies.
///
/// Implementors are internally synchronized and shared across request
/// handlers, the health checker and the retrying transport.
pub trait Balancer: Send + Sync + 'static {
    /// Pick the next live backend, or `NoAvailableBackends`.
    fn next_available(&self) -> Result<Arc<Backend>, SelectError>;

    /// Flag a backend as ineligible for selection. Idempotent.
    fn mark_down(&self, backend: &Backend);

    /// Append a backend. Duplicate URLs are permitted; both get polled.
    fn add(&self, backend: Backend);

    /// Remove the first backend whose URL matches exactly. Returns whether a
    /// removal occurred.
    fn remove(&self, url: &str) -> bool;

    /// Shallow copy of the current sequence.
    fn snapshot(&self) -> Vec<Arc<Backend>>;
}

struct Ring {
    backends: Vec<Arc<Backend>>,
    next: usize,
}

impl Ring {
    // Invariant: next < backends.len() whenever the ring is non-empty.
    fn remove(&mut self, url: &str) -> bool {
        let Some(index) = self.backends.iter().position(|b| b.url() == url) else {
            return false;
        };
        self.backends.remove(index);
        if self.backends.is_empty() {
            self.next = 0;
        } else {
            if index < self.next {
                self.next -= 1;
            }
            if self.next >= self.backends.len() {
                self.next = 0;
            }
        }
        true
    }
}

/// Round-robin selection over the live subset of an ordered backend set.
pub struct RoundRobinBalancer {
    ring: Mutex<Ring>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                backends: Vec::new(),
                next: 0,
            }),
        }
    }

    /// Convenience constructor seeding the ring from parsed backends.
    pub fn with_backends(backends: impl IntoIterator<Item = Backend>) -> Self {
        let balancer = Self::new();
        for backend in backends {
            balancer.add(backend);
        }
        balancer
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RoundRobinBalancer {
    fn next_available(&self) -> Result<Arc<Backend>, SelectError> {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let len = ring.backends.len();
        if len == 0 {
            return Err(SelectError::NoAvailableBackends);
        }

        let start = ring.next;
        for i in 0..len {
            let index = (start + i) % len;
            if !ring.backends[index].is_down() {
                ring.next = (index + 1) % len;
                return Ok(Arc::clone(&ring.backends[index]));
            }
        }
        Err(SelectError::NoAvailableBackends)
    }

    fn mark_down(&self, backend: &Backend) {
        backend.mark_down();
        tracing::error!(url = %backend.url(), "backend marked as down");
    }

    fn add(&self, backend: Backend) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(url = %backend.url(), "backend added");
        ring.backends.push(Arc::new(backend));
    }

    fn remove(&self, url: &str) -> bool {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = ring.remove(url);
        if removed {
            tracing::info!(url = %url, "backend removed");
        }
        removed
    }

    fn snapshot(&self) -> Vec<Arc<Backend>> {
        let ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.backends.clone()
    }
}

/// Uniform random selection over the live subset.
pub struct RandomBalancer {
    backends: Mutex<Vec<Arc<Backend>>>,
}

impl RandomBalancer {
    pub fn new() -> Self {
        Self {
            backends: Mutex::new(Vec::new()),
        }
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RandomBalancer {
    fn next_available(&self) -> Result<Arc<Backend>, SelectError> {
        let backends = self
            .backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let live: Vec<&Arc<Backend>> = backends.iter().filter(|b| !b.is_down()).collect();
        if live.is_empty() {
            return Err(SelectError::NoAvailableBackends);
        }
        let index = rand::rng().random_range(0..live.len());
        Ok(Arc::clone(live[index]))
    }

    fn mark_down(&self, backend: &Backend) {
        backend.mark_down();
        tracing::error!(url = %backend.url(), "backend marked as down");
    }

    fn add(&self, backend: Backend) {
        let mut backends = self
            .backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::info!(url = %backend.url(), "backend added");
        backends.push(Arc::new(backend));
    }

    fn remove(&self, url: &str) -> bool {
        let mut backends = self
            .backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(index) = backends.iter().position(|b| b.url() == url) else {
            return false;
        };
        backends.remove(index);
        tracing::info!(url = %url, "backend removed");
        true
    }

    fn snapshot(&self) -> Vec<Arc<Backend>> {
        let backends = self
            .backends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        backends.clone()
    }
}
