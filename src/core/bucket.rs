use chrono::{DateTime, Utc};

use crate::ports::storage::BucketRecord;

/// A per-client continuous-refill token counter.
///
/// The bucket itself is plain data; the rate limiter wraps each instance in
/// its own lock and serializes every operation through it. Token math is
/// `f64`: fractional tokens accumulate internally, admission spends whole
/// tokens.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_update: DateTime<Utc>,
}

impl TokenBucket {
    /// A fresh bucket starts full.
    pub fn new(capacity: f64, rate: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_update: now,
        }
    }

    /// Rehydrate a bucket from its persisted snapshot.
    pub fn from_record(record: &BucketRecord) -> Self {
        Self {
            tokens: record.tokens,
            capacity: record.capacity,
            rate: record.rate,
            last_update: record.last_update,
        }
    }

    /// Credit tokens for the time elapsed since the last update, clamped at
    /// capacity. A clock reading earlier than `last_update` credits nothing
    /// and leaves the timestamp untouched.
    pub fn refill(&mut self, now: DateTime<Utc>) {
        if now < self.last_update {
            return;
        }
        let elapsed = (now - self.last_update)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;
    }

    /// Spend one token if available. Callers refill beforehand, either
    /// synchronously or through the background replenisher.
    pub fn allow(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Replace capacity and rate, keeping the current token balance. The next
    /// refill clamps the balance against the new capacity.
    pub fn set_limits(&mut self, capacity: f64, rate: f64, now: DateTime<Utc>) {
        self.capacity = capacity;
        self.rate = rate;
        self.last_update = now;
    }

    /// Snapshot for persistence.
    pub fn record(&self) -> BucketRecord {
        BucketRecord {
            tokens: self.tokens,
            capacity: self.capacity,
            rate: self.rate,
            last_update: self.last_update,
        }
    }
}
