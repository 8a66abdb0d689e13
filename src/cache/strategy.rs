//! Adaptive strategy engine: decides which tier should serve an object.
//!
//! ```text
//! base    = tier_table[classify(name).policy_key()]   (missing → cold)
//! decided = adjust(base, access_frequency, mode)
//!
//! performance: cold & freq > promote_cold_after → hot
//!              warm & freq > promote_warm_after → hot
//! cost_saving: hot  & freq < demote_hot_below   → cold
//!              warm & freq < demote_warm_below  → cold
//! balanced:    base
//! ```
//!
//! Also owns per-object access statistics and the global hit counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::layer::{classify, LayerClass};
use crate::cache::object::{ModeCell, ObjectDescriptor, OperatingMode, Tier};
use crate::config::{CompressionConfig, StrategyConfig};

/// Point-in-time view of hit statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub mode: OperatingMode,
    pub total_requests: u64,
    pub hot_hit_rate: f64,
    pub prefetch_hit_rate: f64,
    pub cold_hit_rate: f64,
    pub hot_hits: u64,
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub prefetch_hits: u64,
    /// Seconds since the Unix epoch when counting started.
    pub stats_since: u64,
}

#[derive(Debug, Default)]
struct HitCounters {
    total: AtomicU64,
    hot: AtomicU64,
    warm: AtomicU64,
    cold: AtomicU64,
    prefetch: AtomicU64,
}

fn rate(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Tier placement policy plus access bookkeeping.
pub struct StrategyEngine {
    config: StrategyConfig,
    compression: CompressionConfig,
    mode: ModeCell,
    objects: DashMap<String, ObjectDescriptor>,
    hits: HitCounters,
    stats_since: Mutex<SystemTime>,
}

impl StrategyEngine {
    pub fn new(config: StrategyConfig, compression: CompressionConfig) -> Self {
        info!(mode = %config.mode, classes = config.tier_table.len(), "Strategy engine ready");
        Self {
            mode: ModeCell::new(config.mode),
            config,
            compression,
            objects: DashMap::new(),
            hits: HitCounters::default(),
            stats_since: Mutex::new(SystemTime::now()),
        }
    }

    /// Choose the tier for this access and count it against the object.
    pub fn select_tier(&self, name: &str, size: u64) -> Tier {
        let class = classify(name);
        let frequency = {
            let mut desc = self
                .objects
                .entry(name.to_string())
                .or_insert_with(|| ObjectDescriptor::new(name, size, class));
            desc.touch(size);
            desc.access_frequency
        };

        let mode = self.mode.get();
        let tier = self.decide(class, frequency, mode);
        debug!(name, class = %class, frequency, mode = %mode, tier = %tier, "Tier selected");
        tier
    }

    /// Pure policy: base tier for `class`, adjusted for `mode`.
    pub fn decide(&self, class: LayerClass, frequency: u64, mode: OperatingMode) -> Tier {
        let base = self.base_tier(class);
        let c = &self.config;

        match (mode, base) {
            (OperatingMode::Performance, Tier::Cold) if frequency > c.promote_cold_after => Tier::Hot,
            (OperatingMode::Performance, Tier::Warm) if frequency > c.promote_warm_after => Tier::Hot,
            (OperatingMode::CostSaving, Tier::Hot) if frequency < c.demote_hot_below => Tier::Cold,
            (OperatingMode::CostSaving, Tier::Warm) if frequency < c.demote_warm_below => Tier::Cold,
            _ => base,
        }
    }

    /// Configured tier for `class`; unknown classes are cold.
    pub fn base_tier(&self, class: LayerClass) -> Tier {
        self.config
            .tier_table
            .get(&class.policy_key())
            .copied()
            .unwrap_or(Tier::Cold)
    }

    /// Whether an object of this name and size should be compressed in the hot tier.
    ///
    /// Config-family objects are small and read whole, so they stay plain.
    pub fn should_compress(&self, name: &str, size: u64) -> bool {
        self.compression.enabled
            && classify(name) != LayerClass::Config
            && size >= self.compression.min_size
    }

    pub fn cache_ttl(&self, tier: Tier) -> Duration {
        self.config.cache_ttl.for_tier(tier)
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode.get()
    }

    pub fn set_mode(&self, mode: OperatingMode) {
        let previous = self.mode.get();
        self.mode.set(mode);
        info!(from = %previous, to = %mode, "Operating mode switched");
    }

    /// Count a served read.
    ///
    /// `total` is incremented before the per-tier counter, so any snapshot
    /// observes `hot + warm + cold <= total`.
    pub fn record_hit(&self, tier: Tier, was_prefetched: bool) {
        self.hits.total.fetch_add(1, Ordering::SeqCst);
        let counter = match tier {
            Tier::Hot => &self.hits.hot,
            Tier::Warm => &self.hits.warm,
            Tier::Cold => &self.hits.cold,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        if was_prefetched {
            self.hits.prefetch.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        let hot = self.hits.hot.load(Ordering::SeqCst);
        let warm = self.hits.warm.load(Ordering::SeqCst);
        let cold = self.hits.cold.load(Ordering::SeqCst);
        let prefetch = self.hits.prefetch.load(Ordering::SeqCst);
        let total = self.hits.total.load(Ordering::SeqCst);

        PerformanceSnapshot {
            mode: self.mode.get(),
            total_requests: total,
            hot_hit_rate: rate(hot, total),
            prefetch_hit_rate: rate(prefetch.min(total), total),
            cold_hit_rate: rate(cold, total),
            hot_hits: hot,
            warm_hits: warm,
            cold_hits: cold,
            prefetch_hits: prefetch,
            stats_since: unix_secs(*self.stats_since.lock()),
        }
    }

    /// Access count per object name.
    pub fn access_frequencies(&self) -> BTreeMap<String, u64> {
        self.objects
            .iter()
            .map(|entry| (entry.key().clone(), entry.access_frequency))
            .collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<ObjectDescriptor> {
        self.objects.get(name).map(|d| d.clone())
    }

    /// Drop the descriptor of an object no tier holds.
    pub fn forget(&self, name: &str) -> bool {
        self.objects.remove(name).is_some()
    }

    /// Zero the hit counters. Object descriptors are kept.
    pub fn reset_stats(&self) {
        let mut since = self.stats_since.lock();
        for counter in [
            &self.hits.hot,
            &self.hits.warm,
            &self.hits.cold,
            &self.hits.prefetch,
            &self.hits.total,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        *since = SystemTime::now();
        info!("Performance statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(mode: OperatingMode) -> StrategyEngine {
        let config = StrategyConfig {
            mode,
            ..Default::default()
        };
        StrategyEngine::new(config, CompressionConfig::default())
    }

    #[test]
    fn test_balanced_uses_base_table() {
        let engine = engine_with(OperatingMode::Balanced);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Hot);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Warm);
        assert_eq!(engine.select_tier("layer3.bin", 0), Tier::Cold);
        assert_eq!(engine.select_tier("pooler.bin", 0), Tier::Hot);
        assert_eq!(engine.select_tier("vocab.txt", 0), Tier::Cold);
        assert_eq!(engine.select_tier("layer17.bin", 0), Tier::Cold);
    }

    #[test]
    fn test_performance_promotes_warm_after_threshold() {
        let engine = engine_with(OperatingMode::Performance);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Warm);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Warm);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Hot);
    }

    #[test]
    fn test_cost_saving_demotes_until_threshold() {
        let engine = engine_with(OperatingMode::CostSaving);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Cold);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Cold);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Hot);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Cold);
        assert_eq!(engine.select_tier("layer2.bin", 0), Tier::Warm);
    }

    #[test]
    fn test_mode_switch_applies_to_next_decision() {
        let engine = engine_with(OperatingMode::Balanced);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Hot);
        engine.set_mode(OperatingMode::CostSaving);
        assert_eq!(engine.select_tier("embedding.bin", 0), Tier::Cold);
        assert_eq!(engine.mode(), OperatingMode::CostSaving);
    }

    #[test]
    fn test_should_compress() {
        let engine = engine_with(OperatingMode::Balanced);
        assert!(engine.should_compress("layer0.bin", 4096));
        assert!(!engine.should_compress("layer0.bin", 100));
        assert!(!engine.should_compress("config.json", 1 << 20));
    }

    #[test]
    fn test_snapshot_rates() {
        let engine = engine_with(OperatingMode::Balanced);
        let empty = engine.performance_snapshot();
        assert_eq!(empty.total_requests, 0);
        assert_eq!(empty.hot_hit_rate, 0.0);
        assert_eq!(empty.cold_hit_rate, 0.0);

        engine.record_hit(Tier::Hot, true);
        engine.record_hit(Tier::Hot, false);
        engine.record_hit(Tier::Cold, false);
        engine.record_hit(Tier::Warm, false);

        let snap = engine.performance_snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.hot_hit_rate, 0.5);
        assert_eq!(snap.cold_hit_rate, 0.25);
        assert_eq!(snap.prefetch_hit_rate, 0.25);
        assert!(snap.hot_hit_rate + snap.cold_hit_rate <= 1.0);

        engine.reset_stats();
        assert_eq!(engine.performance_snapshot().total_requests, 0);
    }

    #[test]
    fn test_access_frequencies() {
        let engine = engine_with(OperatingMode::Balanced);
        engine.select_tier("a.bin", 10);
        engine.select_tier("a.bin", 20);
        engine.select_tier("b.bin", 0);

        let freq = engine.access_frequencies();
        assert_eq!(freq.get("a.bin"), Some(&2));
        assert_eq!(freq.get("b.bin"), Some(&1));
        assert_eq!(engine.descriptor("a.bin").unwrap().size_hint, 20);
    }
}
