//! Per-client token-bucket rate limiter with durable state.
//!
//! The limiter owns two maps keyed by client ID — bucket handles and
//! last-admission timestamps — guarded by a single index lock. Every bucket
//! has its own lock; the index lock is strictly shorter-lived than a bucket
//! lock and the two are never taken in reverse order. Two background tasks
//! run while the limiter is started: the replenisher refills every bucket,
//! the cleaner evicts buckets idle past their TTL (persisting them first).
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    config::models::RateLimiterConfig,
    core::bucket::TokenBucket,
    ports::storage::{BucketStore, StorageError},
};

const DEFAULT_REPLENISH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LimiterError {
    #[error("client does not exist")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

type BucketHandle = Arc<Mutex<TokenBucket>>;

struct Index {
    // Both maps always hold identical key sets.
    buckets: HashMap<String, BucketHandle>,
    last_used: HashMap<String, DateTime<Utc>>,
}

pub struct RateLimiter {
    index: Mutex<Index>,
    default_capacity: f64,
    default_rate: f64,
    replenish_interval: Duration,
    cleanup_interval: Duration,
    bucket_ttl: Duration,
    storage: Arc<dyn BucketStore>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RateLimiter {
    /// Build a limiter and hydrate it from storage. A storage read failure is
    /// logged and yields an empty index; admission then recreates buckets
    /// lazily.
    pub fn new(config: &RateLimiterConfig, storage: Arc<dyn BucketStore>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let limiter = Self {
            index: Mutex::new(Index {
                buckets: HashMap::new(),
                last_used: HashMap::new(),
            }),
            default_capacity: config.default_capacity,
            default_rate: config.default_rate,
            replenish_interval: DEFAULT_REPLENISH_INTERVAL,
            cleanup_interval: config.cleanup_interval,
            bucket_ttl: config.bucket_ttl,
            storage,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        };
        limiter.load_from_storage();
        limiter
    }

    /// Override the replenisher period (default 30 s).
    pub fn with_replenish_interval(mut self, interval: Duration) -> Self {
        self.replenish_interval = interval;
        self
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_from_storage(&self) {
        let records = match self.storage.load_all() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "failed to load clients from storage");
                return;
            }
        };

        let now = Utc::now();
        let mut index = self.lock_index();
        for (client_id, record) in records {
            let mut bucket = TokenBucket::from_record(&record);
            bucket.refill(now);
            index
                .buckets
                .insert(client_id.clone(), Arc::new(Mutex::new(bucket)));
            index.last_used.insert(client_id, record.last_update);
        }
        tracing::info!(clients = index.buckets.len(), "restored bucket state");
    }

    /// Decide whether `client_id` may proceed, creating a default bucket on
    /// first sight. A failure to persist a newly-created bucket denies the
    /// request and leaves the index unchanged.
    pub fn allow(&self, client_id: &str) -> bool {
        let now = Utc::now();

        let bucket = {
            let mut index = self.lock_index();
            match index.buckets.get(client_id) {
                Some(bucket) => {
                    let bucket = Arc::clone(bucket);
                    index.last_used.insert(client_id.to_string(), now);
                    bucket
                }
                None => {
                    let bucket = TokenBucket::new(self.default_capacity, self.default_rate, now);
                    if let Err(e) = self.storage.save(client_id, &bucket.record()) {
                        tracing::warn!(
                            client_id = %client_id,
                            error = %e,
                            "failed to persist new bucket, denying request"
                        );
                        return false;
                    }
                    let handle = Arc::new(Mutex::new(bucket));
                    index
                        .buckets
                        .insert(client_id.to_string(), Arc::clone(&handle));
                    index.last_used.insert(client_id.to_string(), now);
                    tracing::debug!(client_id = %client_id, "created new bucket");
                    handle
                }
            }
        };

        let allowed = {
            let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.allow()
        };
        if !allowed {
            tracing::debug!(client_id = %client_id, "not enough tokens");
        }
        allowed
    }

    /// Install a fresh bucket for a client, discarding any existing tokens.
    pub fn set_client_limit(
        &self,
        client_id: &str,
        capacity: f64,
        rate: f64,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let bucket = TokenBucket::new(capacity, rate, now);
        self.storage.save(client_id, &bucket.record())?;

        let mut index = self.lock_index();
        index
            .buckets
            .insert(client_id.to_string(), Arc::new(Mutex::new(bucket)));
        index.last_used.insert(client_id.to_string(), now);
        drop(index);

        tracing::info!(
            client_id = %client_id,
            capacity,
            rate,
            "set custom rate limit"
        );
        Ok(())
    }

    /// Reshape an existing bucket, preserving its token balance.
    pub fn update_client_limit(
        &self,
        client_id: &str,
        capacity: f64,
        rate: f64,
    ) -> Result<(), LimiterError> {
        let now = Utc::now();
        let handle = {
            let mut index = self.lock_index();
            let Some(bucket) = index.buckets.get(client_id) else {
                tracing::debug!(client_id = %client_id, "bucket does not exist");
                return Err(LimiterError::NotFound);
            };
            let bucket = Arc::clone(bucket);
            index.last_used.insert(client_id.to_string(), now);
            bucket
        };

        let mut bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(now);

        let mut record = bucket.record();
        record.capacity = capacity;
        record.rate = rate;
        record.last_update = now;
        self.storage.save(client_id, &record)?;

        bucket.set_limits(capacity, rate, now);
        drop(bucket);

        tracing::info!(
            client_id = %client_id,
            capacity,
            rate,
            "updated rate limit"
        );
        Ok(())
    }

    /// Observe a client's in-memory limits.
    pub fn get_client(&self, client_id: &str) -> Option<(f64, f64)> {
        let handle = {
            let index = self.lock_index();
            Arc::clone(index.buckets.get(client_id)?)
        };
        let bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Some((bucket.capacity(), bucket.rate()))
    }

    /// Delete a client from storage and, on success, from the index.
    pub fn remove_client(&self, client_id: &str) -> Result<(), StorageError> {
        let mut index = self.lock_index();
        self.storage.delete(client_id).inspect_err(|e| {
            tracing::error!(client_id = %client_id, error = %e, "failed to delete client");
        })?;
        index.buckets.remove(client_id);
        index.last_used.remove(client_id);
        drop(index);

        tracing::info!(client_id = %client_id, "removed rate limit client");
        Ok(())
    }

    /// Launch the replenisher and cleaner. Idempotence is not required;
    /// called once from process wiring.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let limiter = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.replenish_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.replenish_buckets(),
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("replenisher stopped");
        }));

        let limiter = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.cleanup_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.cleanup(),
                    _ = shutdown.changed() => break,
                }
            }
            tracing::debug!("cleaner stopped");
        }));
    }

    /// Signal both background tasks, await their exit, then persist every
    /// remaining bucket. Persistence failures are logged, not fatal.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.persist_all();
    }

    fn persist_all(&self) {
        let index = self.lock_index();
        for (client_id, handle) in &index.buckets {
            let record = {
                let bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
                bucket.record()
            };
            if let Err(e) = self.storage.save(client_id, &record) {
                tracing::error!(client_id = %client_id, error = %e, "failed to save bucket on stop");
            } else {
                tracing::debug!(client_id = %client_id, "saved bucket on stop");
            }
        }
    }

    /// One replenisher pass: refill every bucket to now. No persistence.
    fn replenish_buckets(&self) {
        let handles: Vec<BucketHandle> = {
            let index = self.lock_index();
            index.buckets.values().cloned().collect()
        };

        let now = Utc::now();
        for handle in handles {
            let mut bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.refill(now);
        }
    }

    /// One cleaner pass: evict clients idle past the TTL, persisting each
    /// bucket first. A failed persist leaves the entry for the next cycle.
    fn cleanup(&self) {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.bucket_ttl).unwrap_or(chrono::Duration::MAX);

        let mut index = self.lock_index();
        let expired: Vec<String> = index
            .last_used
            .iter()
            .filter(|(_, last_used)| now - **last_used > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = 0usize;
        for client_id in expired {
            let Some(handle) = index.buckets.get(&client_id) else {
                continue;
            };
            let record = {
                let bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
                bucket.record()
            };
            match self.storage.save(&client_id, &record) {
                Ok(()) => {
                    index.buckets.remove(&client_id);
                    index.last_used.remove(&client_id);
                    evicted += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        client_id = %client_id,
                        error = %e,
                        "failed to save bucket state before eviction"
                    );
                }
            }
        }

        if evicted > 0 {
            tracing::info!(count = evicted, "cleaned up expired rate limit buckets");
        }
    }

    #[cfg(test)]
    fn bucket_tokens(&self, client_id: &str) -> Option<f64> {
        let handle = {
            let index = self.lock_index();
            Arc::clone(index.buckets.get(client_id)?)
        };
        let bucket = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Some(bucket.tokens())
    }

    #[cfg(test)]
    fn index_key_sets_match(&self) -> bool {
        let index = self.lock_index();
        index.buckets.len() == index.last_used.len()
            && index.buckets.keys().all(|k| index.last_used.contains_key(k))
    }

    #[cfg(test)]
    fn backdate_last_used(&self, client_id: &str, instant: DateTime<Utc>) {
        let mut index = self.lock_index();
        index.last_used.insert(client_id.to_string(), instant);
    }
}
