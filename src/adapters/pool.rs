//! Fixed-size pool of reusable outbound transports.
//!
//! Each slot holds one [`HttpClient`] with its own idle-connection cache. A
//! request leases a slot for its whole lifetime (all retries across all
//! backends) and the lease guard returns the slot on drop, whatever the
//! outcome. The pool never grows past its construction size.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use eyre::Result;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::{
    adapters::http_client::HttpClientAdapter,
    config::models::ProxyConfig,
    ports::http_client::HttpClient,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PoolError {
    #[error("connection pool is closed")]
    Closed,
}

pub struct TransportPool {
    slots: Vec<Arc<dyn HttpClient>>,
    free: Mutex<VecDeque<usize>>,
    permits: Semaphore,
}

impl TransportPool {
    /// Build `connection_pool_size` transports from the proxy configuration.
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let size = config.connection_pool_size.max(1);
        let mut slots: Vec<Arc<dyn HttpClient>> = Vec::with_capacity(size);
        for _ in 0..size {
            slots.push(Arc::new(HttpClientAdapter::new(
                &config.proxy_transport_options,
            )?));
        }
        Ok(Self::from_clients(slots))
    }

    /// Assemble a pool from pre-built transports. The pool size is fixed to
    /// `clients.len()`.
    pub fn from_clients(clients: Vec<Arc<dyn HttpClient>>) -> Self {
        let size = clients.len();
        Self {
            slots: clients,
            free: Mutex::new((0..size).collect()),
            permits: Semaphore::new(size),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Lease a transport slot, waiting until one frees up. Fails only once
    /// the pool is closed.
    pub async fn acquire(&self) -> Result<TransportLease<'_>, PoolError> {
        let permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        let index = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(PoolError::Closed)?;
        Ok(TransportLease {
            pool: self,
            index,
            _permit: permit,
        })
    }

    /// Refuse all further acquires. Idle upstream connections close as the
    /// transports drop with the pool.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A leased slot. Dropping the lease returns the slot to the pool.
pub struct TransportLease<'a> {
    pool: &'a TransportPool,
    index: usize,
    _permit: SemaphorePermit<'a>,
}

impl TransportLease<'_> {
    pub fn transport(&self) -> &Arc<dyn HttpClient> {
        &self.pool.slots[self.index]
    }
}

impl Drop for TransportLease<'_> {
    fn drop(&mut self) {
        // The slot index goes back before the permit releases (the permit
        // field drops after this runs), so a waiter can never pop an empty
        // queue.
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.index);
    }
}
