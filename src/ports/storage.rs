use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors arising from the durable bucket state store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage path is a directory, not a file")]
    PathIsDirectory,

    #[error("failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in state file: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Result type alias for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persisted shape of a client's token bucket.
///
/// Serialized as `{tokens, capacity, rate, last_update}` with an ISO-8601
/// timestamp; the on-disk document is a single map from client ID to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub tokens: f64,
    pub capacity: f64,
    pub rate: f64,
    pub last_update: DateTime<Utc>,
}

/// BucketStore defines the port for persisting per-client bucket snapshots.
///
/// Implementations serialize access internally; callers may invoke any method
/// from any task. Operations block on I/O.
pub trait BucketStore: Send + Sync + 'static {
    /// Upsert one client record. Durable before return.
    fn save(&self, client_id: &str, record: &BucketRecord) -> StorageResult<()>;

    /// Read the full client map. An empty or missing document yields an empty
    /// map.
    fn load_all(&self) -> StorageResult<HashMap<String, BucketRecord>>;

    /// Remove one client record. Removing an absent key is not an error.
    fn delete(&self, client_id: &str) -> StorageResult<()>;
}
