//! Semantic prefetching: predicts which tensor files a forward pass will read
//! next and loads them into the hot tier ahead of time.
//!
//! Predictions come from three sources, merged without duplicates:
//! 1. Dependency graph: fixed forward-pass order over layer classes
//! 2. Mined patterns: `prev -> next` transitions seen often enough
//! 3. Positional inference: `…layer3…` predicts `…layer4…`, and the deepest
//!    layer predicts the output-family objects

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::layer::{classify, with_layer_index, DependencyGraph, LayerClass, LayerNamespace};
use crate::cache::ledger::{PrefetchLedger, PrefetchStats};
use crate::cache::object::Operation;
use crate::cache::pool::{PoolStats, PrefetchPool};
use crate::cache::tier_io::TierIo;
use crate::config::PrefetchConfig;
use crate::metrics::Metrics;
use crate::storage::StorageError;

const PATTERN_FILE_VERSION: u32 = 1;

/// One observed access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub name: String,
    pub operation: Operation,
    pub size: u64,
    pub timestamp: SystemTime,
    pub layer_class: LayerClass,
    pub was_prefetch_hit: bool,
}

/// How often `from` was immediately followed by `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternCount {
    pub from: String,
    pub to: String,
    pub count: u64,
}

#[derive(Serialize, Deserialize)]
struct PatternFile {
    version: u32,
    patterns: Vec<PatternCount>,
    history: Vec<AccessRecord>,
}

#[derive(Debug, Default)]
struct History {
    records: VecDeque<AccessRecord>,
    patterns: HashMap<(String, String), u64>,
    namespace: LayerNamespace,
    last: Option<String>,
}

impl History {
    fn sorted_patterns(&self) -> Vec<PatternCount> {
        let mut out: Vec<PatternCount> = self
            .patterns
            .iter()
            .map(|((from, to), &count)| PatternCount {
                from: from.clone(),
                to: to.clone(),
                count,
            })
            .collect();
        out.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.from.cmp(&b.from))
                .then_with(|| a.to.cmp(&b.to))
        });
        out
    }
}

pub struct SemanticPrefetcher {
    config: PrefetchConfig,
    graph: DependencyGraph,
    state: Mutex<History>,
    ledger: Arc<PrefetchLedger>,
    pool: PrefetchPool,
}

impl SemanticPrefetcher {
    /// Build the prefetcher and start its worker pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: PrefetchConfig, io: Arc<TierIo>, metrics: Arc<Metrics>) -> Self {
        let ledger = Arc::new(PrefetchLedger::new());
        let pool = PrefetchPool::start(&config, io, ledger.clone(), metrics);
        let state = History {
            namespace: LayerNamespace::new(&config.known_objects),
            ..Default::default()
        };

        info!(
            enabled = config.enabled,
            encoder_layers = config.encoder_layers,
            known_objects = config.known_objects.len(),
            "Semantic prefetcher ready"
        );

        Self {
            graph: DependencyGraph::new(config.encoder_layers),
            config,
            state: Mutex::new(state),
            ledger,
            pool,
        }
    }

    /// Record a foreground access. Returns whether it consumed a prefetch.
    ///
    /// The pending ledger entry is claimed before the record is written, so a
    /// concurrent prefetch job can never count a miss for a name that was hit.
    pub fn record_access(&self, name: &str, operation: Operation, size: u64) -> bool {
        let was_prefetch_hit = self.ledger.claim_hit(name);
        let record = AccessRecord {
            name: name.to_string(),
            operation,
            size,
            timestamp: SystemTime::now(),
            layer_class: classify(name),
            was_prefetch_hit,
        };

        let mut state = self.state.lock();
        if let Some(prev) = state.last.replace(name.to_string()) {
            let full = state.patterns.len() >= self.config.max_patterns;
            match state.patterns.entry((prev, name.to_string())) {
                Entry::Occupied(mut count) => *count.get_mut() += 1,
                Entry::Vacant(slot) if !full => {
                    slot.insert(1);
                }
                Entry::Vacant(_) => {}
            }
        }
        state.records.push_back(record);
        while state.records.len() > self.config.history_size {
            state.records.pop_front();
        }
        drop(state);

        if was_prefetch_hit {
            debug!(name, "Prefetch hit");
        }
        was_prefetch_hit
    }

    /// Make `name` eligible as a graph prediction once a tier has served it.
    pub fn register_served(&self, name: &str) {
        self.state.lock().namespace.register(name);
    }

    /// Names likely to be read right after `name`. Never contains `name`.
    pub fn predict_successors(&self, name: &str) -> BTreeSet<String> {
        let class = classify(name);
        let mut predicted = BTreeSet::new();
        let state = self.state.lock();

        for next in self.graph.successors(class) {
            if let Some(candidate) = state.namespace.name_for(next) {
                predicted.insert(candidate.to_string());
            }
        }

        for ((from, to), &count) in &state.patterns {
            if from == name && count >= self.config.pattern_threshold {
                predicted.insert(to.clone());
            }
        }

        if let Some(index) = class.index() {
            match self.graph.next_layer(index) {
                Some(next) => predicted.extend(with_layer_index(name, next)),
                None => {
                    for terminal in DependencyGraph::terminal_classes() {
                        if let Some(candidate) = state.namespace.name_for(terminal) {
                            predicted.insert(candidate.to_string());
                        }
                    }
                }
            }
        }
        drop(state);

        predicted.remove(name);
        predicted
    }

    /// Start a background load of `name` unless one is already pending.
    pub fn dispatch_prefetch(&self, name: &str) -> bool {
        if !self.config.enabled || name.is_empty() {
            return false;
        }
        match self.ledger.try_begin(name) {
            Some(ticket) => self.pool.submit(ticket),
            None => {
                debug!(name, "Prefetch already pending, skipping");
                false
            }
        }
    }

    /// Predict successors of `name` and dispatch each. Returns how many were queued.
    pub fn prefetch_successors(&self, name: &str) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let predicted = self.predict_successors(name);
        let queued = predicted
            .iter()
            .filter(|candidate| self.dispatch_prefetch(candidate))
            .count();
        if queued > 0 {
            debug!(name, predicted = predicted.len(), queued, "Prefetch fan-out");
        }
        queued
    }

    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.ledger.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Mined transitions, most frequent first.
    pub fn access_patterns(&self) -> Vec<PatternCount> {
        self.state.lock().sorted_patterns()
    }

    /// Recent accesses, oldest first.
    pub fn history(&self) -> Vec<AccessRecord> {
        self.state.lock().records.iter().cloned().collect()
    }

    /// Clear counters, history and mined patterns. Known names are kept.
    pub fn reset_stats(&self) {
        self.ledger.reset();
        let mut state = self.state.lock();
        state.records.clear();
        state.patterns.clear();
        state.last = None;
        info!("Prefetch statistics reset");
    }

    /// Persist mined patterns and history as JSON.
    pub async fn save_patterns(&self, path: &Path) -> Result<(), StorageError> {
        let file = {
            let state = self.state.lock();
            PatternFile {
                version: PATTERN_FILE_VERSION,
                patterns: state.sorted_patterns(),
                history: state.records.iter().cloned().collect(),
            }
        };
        let json = serde_json::to_vec_pretty(&file).map_err(std::io::Error::from)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), patterns = file.patterns.len(), "Saved access patterns");
        Ok(())
    }

    /// Replace patterns and history with a saved file.
    ///
    /// Returns the number of patterns loaded; any failure is logged and
    /// leaves the current state untouched.
    pub async fn load_patterns(&self, path: &Path) -> usize {
        let file = match read_pattern_file(path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not load access patterns");
                return 0;
            }
        };

        let mut state = self.state.lock();
        state.patterns = file
            .patterns
            .into_iter()
            .take(self.config.max_patterns)
            .map(|p| ((p.from, p.to), p.count))
            .collect();
        let skip = file.history.len().saturating_sub(self.config.history_size);
        state.records = file.history.into_iter().skip(skip).collect();

        let names: Vec<String> = state
            .patterns
            .keys()
            .flat_map(|(from, to)| [from.clone(), to.clone()])
            .chain(state.records.iter().map(|r| r.name.clone()))
            .collect();
        for name in names {
            state.namespace.register(&name);
        }
        state.last = None;

        let loaded = state.patterns.len();
        info!(path = %path.display(), patterns = loaded, "Loaded access patterns");
        loaded
    }

    /// Stop the worker pool and wait for running loads.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

async fn read_pattern_file(path: &Path) -> Result<PatternFile, StorageError> {
    let data = tokio::fs::read(path).await?;
    let file: PatternFile = serde_json::from_slice(&data).map_err(std::io::Error::from)?;
    if file.version != PATTERN_FILE_VERSION {
        return Err(StorageError::Unavailable(format!(
            "unsupported pattern file version {}",
            file.version
        )));
    }
    Ok(file)
}
