//! Storage backends behind the coordinator.
//!
//! - [`HotTier`]: key-value cache with per-entry TTL (memory speed)
//! - [`ObjectSource`]: authoritative object source, queried by name
//! - [`BucketStore`]: secondary cold object store, bucket-scoped
//!
//! Implementations:
//! - [`memory`]: in-process TTL map and in-memory object store
//! - [`disk`]: directory-backed object source and bucket store

pub mod disk;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use disk::{DirectoryBucketStore, DirectoryObjectSource};
pub use memory::{MemoryHotTier, MemoryObjectStore};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Key under which an object's envelope is stored in the hot tier.
pub fn hot_key(name: &str) -> String {
    format!("obj:{name}")
}

/// Fast tier: binary values with expiry.
#[async_trait]
pub trait HotTier: Send + Sync {
    /// Fetch a live value. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Store a value, replacing any previous one (last write wins).
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StorageError>;

    /// Remove a value. Returns whether a live value was present.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Authoritative source of object bytes.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch the full object, or `None` if the source does not have it.
    async fn fetch(&self, name: &str) -> Result<Option<Bytes>, StorageError>;
}

/// Secondary cold object store.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Fetch `key` from `bucket`, or `None` if absent.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError>;
}

/// Reject keys that could escape a backend's root directory.
pub(crate) fn check_key(key: &str) -> Result<(), StorageError> {
    let escapes = key.is_empty()
        || key.starts_with('/')
        || key.starts_with('\\')
        || key.contains('\0')
        || key.split(['/', '\\']).any(|part| part == "..");
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
