//! Backend access shared by foreground reads and prefetch jobs.
//!
//! Every call is bounded by the configured I/O timeout. Failures are logged
//! and reported as absence, so callers simply fall through to the next tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::cache::compressor::CompressionManager;
use crate::cache::envelope::CacheEnvelope;
use crate::cache::object::Tier;
use crate::cache::strategy::StrategyEngine;
use crate::config::CompressionConfig;
use crate::error::TierError;
use crate::storage::{hot_key, BucketStore, HotTier, ObjectSource, StorageError};

/// The three backends behind the coordinator.
#[derive(Clone)]
pub struct Backends {
    pub hot: Arc<dyn HotTier>,
    pub source: Arc<dyn ObjectSource>,
    pub bucket: Arc<dyn BucketStore>,
}

pub struct TierIo {
    backends: Backends,
    bucket: String,
    codec: CompressionManager,
    min_savings_ratio: f64,
    strategy: Arc<StrategyEngine>,
    timeout: Duration,
}

impl TierIo {
    pub fn new(
        backends: Backends,
        bucket: impl Into<String>,
        compression: CompressionConfig,
        strategy: Arc<StrategyEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            backends,
            bucket: bucket.into(),
            min_savings_ratio: compression.min_savings_ratio,
            codec: CompressionManager::new(compression),
            strategy,
            timeout,
        }
    }

    pub fn codec(&self) -> &CompressionManager {
        &self.codec
    }

    /// Read and unwrap the hot-tier envelope for `name`.
    ///
    /// An entry that cannot be decoded is deleted and reads as a miss.
    pub async fn read_hot(&self, name: &str) -> Option<Vec<u8>> {
        let key = hot_key(name);
        let raw = self.bounded("hot", self.backends.hot.get(&key)).await.flatten()?;

        let opened = CacheEnvelope::decode(&raw).and_then(|envelope| envelope.open(&self.codec));
        match opened {
            Ok(data) => {
                debug!(name, size = data.len(), "Hot tier hit");
                Some(data)
            }
            Err(e) => {
                let err = TierError::from(e);
                warn!(name, error = %err, "Discarding undecodable hot-tier entry");
                self.bounded("hot", self.backends.hot.delete(&key)).await;
                None
            }
        }
    }

    /// Fetch from the authoritative object source.
    pub async fn fetch_source(&self, name: &str) -> Option<Bytes> {
        self.bounded("source", self.backends.source.fetch(name))
            .await
            .flatten()
    }

    /// Fetch from the secondary cold store, scoped to the configured bucket.
    pub async fn fetch_bucket(&self, name: &str) -> Option<Bytes> {
        self.bounded("bucket", self.backends.bucket.get_object(&self.bucket, name))
            .await
            .flatten()
    }

    /// Write `data` to the hot tier with the TTL for `tier`.
    ///
    /// Compresses when the strategy allows it for this object and a trial
    /// shows enough savings. Returns whether the write landed.
    pub async fn write_hot(&self, name: &str, data: &[u8], tier: Tier) -> bool {
        let compress = self.strategy.should_compress(name, data.len() as u64)
            && self.codec.should_compress(data, self.min_savings_ratio);

        let envelope = if compress {
            CacheEnvelope::compressed(&self.codec, data)
        } else {
            CacheEnvelope::plain(data)
        };
        let ttl = self.strategy.cache_ttl(tier);
        let encoded = envelope.encode();

        debug!(
            name,
            original = data.len(),
            stored = encoded.len(),
            algorithm = %envelope.algorithm,
            ttl_secs = ttl.as_secs(),
            "Writing to hot tier"
        );
        self.bounded("hot", self.backends.hot.set(&hot_key(name), encoded, ttl))
            .await
            .is_some()
    }

    /// Run a backend call under the I/O timeout, logging any failure.
    async fn bounded<T, F>(&self, backend: &'static str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.timeout.as_millis() as u64)),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                let err = TierError::backend(backend, e);
                warn!(error = %err, "Backend call failed, falling through");
                None
            }
        }
    }
}
