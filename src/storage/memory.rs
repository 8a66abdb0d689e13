//! In-process backends.
//!
//! [`MemoryHotTier`] is the default hot tier: a concurrent map whose entries
//! carry an expiry instant. Expired entries are dropped lazily on read and in
//! bulk by [`MemoryHotTier::purge_expired`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::storage::{BucketStore, HotTier, ObjectSource, StorageError};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// TTL-bounded key-value cache held in process memory.
#[derive(Debug, Default)]
pub struct MemoryHotTier {
    entries: DashMap<String, Entry>,
}

impl MemoryHotTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl HotTier for MemoryHotTier {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StorageError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.expires_at > now))
    }
}

/// In-memory object store, usable as either cold backend.
///
/// As an [`ObjectSource`] it serves the default bucket.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), Bytes>,
    default_bucket: String,
}

impl MemoryObjectStore {
    pub fn new(default_bucket: impl Into<String>) -> Self {
        Self {
            objects: DashMap::new(),
            default_bucket: default_bucket.into(),
        }
    }

    /// Store an object in the default bucket.
    pub fn insert(&self, name: &str, data: impl Into<Bytes>) {
        let bucket = self.default_bucket.clone();
        self.insert_in(&bucket, name, data);
    }

    pub fn insert_in(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.objects
            .remove(&(self.default_bucket.clone(), name.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectSource for MemoryObjectStore {
    async fn fetch(&self, name: &str) -> Result<Option<Bytes>, StorageError> {
        self.get_object(&self.default_bucket, name).await
    }
}

#[async_trait]
impl BucketStore for MemoryObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }
}
