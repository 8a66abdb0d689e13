//! Tiered storage coordinator: the single read entry point.
//!
//! The coordinator is the central piece of tensor-tier. For every read it:
//! - Records the access (claiming any pending prefetch for the name)
//! - Asks the strategy engine which tier should serve it
//! - Walks hot → authoritative source → secondary cold store
//! - Writes back to the hot tier when the decision is hot
//! - Fans out prefetches for the predicted successors
//!
//! A read never fails because of a backend. When every tier misses, a
//! synthetic placeholder is served instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::ledger::PrefetchStats;
use crate::cache::object::{Operation, OperatingMode, Tier};
use crate::cache::pool::PoolStats;
use crate::cache::prefetcher::SemanticPrefetcher;
use crate::cache::strategy::{PerformanceSnapshot, StrategyEngine};
use crate::cache::tier_io::{Backends, TierIo};
use crate::config::Config;
use crate::error::TierError;
use crate::metrics::{Metrics, ReadSource};

/// Length of the synthetic object served on a total miss.
pub const PLACEHOLDER_BYTES: usize = 512 * 1024;

/// Produces the bytes served when an object is absent from every tier.
pub trait Placeholder: Send + Sync {
    /// The full synthetic object for `name`. The caller applies the range.
    fn synthesize(&self, name: &str) -> Bytes;
}

/// Deterministic all-zero placeholder of a fixed length.
#[derive(Debug, Clone)]
pub struct ZeroFill {
    len: usize,
}

impl ZeroFill {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Default for ZeroFill {
    fn default() -> Self {
        Self::new(PLACEHOLDER_BYTES)
    }
}

impl Placeholder for ZeroFill {
    fn synthesize(&self, _name: &str) -> Bytes {
        Bytes::from(vec![0u8; self.len])
    }
}

/// `data[offset .. min(offset + size, len)]`, empty when `offset >= len`.
pub fn extract_range(data: &Bytes, size: u64, offset: u64) -> Bytes {
    let len = data.len() as u64;
    if offset >= len {
        return Bytes::new();
    }
    let end = offset.saturating_add(size).min(len);
    data.slice(offset as usize..end as usize)
}

/// Everything an operator needs to see, in one pull.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    pub performance: PerformanceSnapshot,
    pub prefetch: PrefetchStats,
    pub pool: PoolStats,
    pub access_frequencies: BTreeMap<String, u64>,
}

pub struct Coordinator {
    strategy: Arc<StrategyEngine>,
    prefetcher: SemanticPrefetcher,
    io: Arc<TierIo>,
    placeholder: Box<dyn Placeholder>,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    /// Wire the engines to the backends and start the prefetch pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, backends: Backends, metrics: Arc<Metrics>) -> Self {
        let strategy = Arc::new(StrategyEngine::new(
            config.strategy.clone(),
            config.compression.clone(),
        ));
        let io = Arc::new(TierIo::new(
            backends,
            config.storage.bucket.clone(),
            config.compression.clone(),
            strategy.clone(),
            config.storage.io_timeout(),
        ));
        let prefetcher = SemanticPrefetcher::new(config.prefetch.clone(), io.clone(), metrics.clone());

        info!(
            mode = %strategy.mode(),
            bucket = %config.storage.bucket,
            compression = %io.codec().default_algorithm(),
            "Coordinator initialized"
        );

        Self {
            strategy,
            prefetcher,
            io,
            placeholder: Box::new(ZeroFill::default()),
            metrics,
        }
    }

    /// Replace the total-miss placeholder.
    pub fn with_placeholder(mut self, placeholder: impl Placeholder + 'static) -> Self {
        self.placeholder = Box::new(placeholder);
        self
    }

    /// Read up to `size` bytes of `name` starting at `offset`.
    ///
    /// Only a malformed request is an error; backend trouble falls through
    /// to the next tier and a total miss serves the placeholder.
    pub async fn get(&self, name: &str, size: u64, offset: u64) -> Result<Bytes, TierError> {
        if name.is_empty() {
            return Err(TierError::InvalidRequest("object name is empty".into()));
        }
        if offset.checked_add(size).is_none() {
            return Err(TierError::InvalidRequest(format!(
                "offset {offset} + size {size} overflows"
            )));
        }

        let was_prefetched = self.prefetcher.record_access(name, Operation::Read, size);
        let tier = self.strategy.select_tier(name, size);

        if tier.reads_through_hot() {
            if let Some(data) = self.io.read_hot(name).await {
                self.strategy.record_hit(Tier::Hot, was_prefetched);
                self.metrics.record_read(ReadSource::Hot);
                self.prefetcher.register_served(name);
                self.prefetcher.prefetch_successors(name);
                debug!(name, tier = %tier, prefetched = was_prefetched, "Served from hot tier");
                return Ok(extract_range(&Bytes::from(data), size, offset));
            }
        }

        let (data, source) = match self.io.fetch_source(name).await {
            Some(data) => (data, ReadSource::Source),
            None => match self.io.fetch_bucket(name).await {
                Some(data) => (data, ReadSource::Bucket),
                None => return Ok(self.serve_placeholder(name, size, offset)),
            },
        };

        if tier == Tier::Hot {
            self.io.write_hot(name, &data, Tier::Hot).await;
        }
        self.strategy.record_hit(Tier::Cold, false);
        self.metrics.record_read(source);
        self.prefetcher.register_served(name);
        self.prefetcher.prefetch_successors(name);
        debug!(name, tier = %tier, source = source.as_str(), size = data.len(), "Served from cold tier");

        Ok(extract_range(&data, size, offset))
    }

    fn serve_placeholder(&self, name: &str, size: u64, offset: u64) -> Bytes {
        let err = TierError::NotFound(name.to_string());
        warn!(error = %err, "Serving placeholder");
        self.metrics.record_read(ReadSource::Placeholder);
        self.strategy.forget(name);
        extract_range(&self.placeholder.synthesize(name), size, offset)
    }

    /// Fan out prefetches from `name` without a foreground read.
    pub fn prefetch(&self, name: &str) -> usize {
        self.prefetcher.prefetch_successors(name)
    }

    pub fn mode(&self) -> OperatingMode {
        self.strategy.mode()
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        self.strategy.set_mode(mode);
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            performance: self.strategy.performance_snapshot(),
            prefetch: self.prefetcher.prefetch_stats(),
            pool: self.prefetcher.pool_stats(),
            access_frequencies: self.strategy.access_frequencies(),
        }
    }

    pub fn reset_stats(&self) {
        self.strategy.reset_stats();
        self.prefetcher.reset_stats();
    }

    pub fn strategy(&self) -> &StrategyEngine {
        &self.strategy
    }

    pub fn prefetcher(&self) -> &SemanticPrefetcher {
        &self.prefetcher
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop background prefetching and wait for running loads.
    pub async fn shutdown(&self) {
        self.prefetcher.shutdown().await;
        info!("Coordinator shut down");
    }
}
