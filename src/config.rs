//! Runtime configuration for tensor-tier.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Every section and field is optional in the file; anything left out keeps
//! the documented default. A file that fails to parse or validate is logged
//! and replaced by the defaults, startup never aborts on configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};

use crate::cache::compressor::CompressionAlgorithm;
use crate::cache::object::{OperatingMode, Tier};
use crate::error::TierError;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tensor-tier", about = "Tiered storage policy server for tensor files")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "tensor-tier.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Operating mode: performance, cost_saving or balanced (overrides the config file).
    #[arg(short, long)]
    pub mode: Option<OperatingMode>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Tier selection policy.
    pub strategy: StrategyConfig,

    /// Hot-tier compression settings.
    pub compression: CompressionConfig,

    /// Semantic prefetch settings.
    pub prefetch: PrefetchConfig,

    /// Backend locations and timeouts.
    pub storage: StorageConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Tier selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Initial operating mode.
    pub mode: OperatingMode,

    /// Base tier per layer-class policy key (`embedding`, `layer<N>`,
    /// `output`, `config`, `checkpoint`, `other`). Entries in the file are
    /// merged over the defaults. Unlisted keys resolve to cold.
    #[serde(deserialize_with = "merge_tier_table")]
    pub tier_table: BTreeMap<String, Tier>,

    /// Hot-tier TTL per tier decision.
    pub cache_ttl: TtlConfig,

    /// Performance mode: cold objects accessed more than this many times go hot.
    pub promote_cold_after: u64,

    /// Performance mode: warm objects accessed more than this many times go hot.
    pub promote_warm_after: u64,

    /// Cost-saving mode: hot objects accessed fewer than this many times go cold.
    pub demote_hot_below: u64,

    /// Cost-saving mode: warm objects accessed fewer than this many times go cold.
    pub demote_warm_below: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Performance,
            tier_table: default_tier_table(),
            cache_ttl: TtlConfig::default(),
            promote_cold_after: 5,
            promote_warm_after: 2,
            demote_hot_below: 3,
            demote_warm_below: 2,
        }
    }
}

fn default_tier_table() -> BTreeMap<String, Tier> {
    [
        ("embedding", Tier::Hot),
        ("layer0", Tier::Hot),
        ("layer1", Tier::Hot),
        ("layer2", Tier::Warm),
        ("layer3", Tier::Cold),
        ("output", Tier::Hot),
        ("config", Tier::Cold),
        ("checkpoint", Tier::Cold),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn merge_tier_table<'de, D>(deserializer: D) -> Result<BTreeMap<String, Tier>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = BTreeMap::<String, Tier>::deserialize(deserializer)?;
    let mut table = default_tier_table();
    table.extend(overrides);
    Ok(table)
}

/// Hot-tier TTLs in seconds, keyed by the tier decision that wrote the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub hot_secs: u64,
    pub warm_secs: u64,
    pub cold_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            hot_secs: 300,   // 5 minutes
            warm_secs: 1800, // 30 minutes
            cold_secs: 3600, // 1 hour
        }
    }
}

impl TtlConfig {
    pub fn for_tier(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Hot => self.hot_secs,
            Tier::Warm => self.warm_secs,
            Tier::Cold => self.cold_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Hot-tier compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress hot-tier writes at all.
    pub enabled: bool,

    /// Objects smaller than this are stored uncompressed.
    pub min_size: u64,

    /// Codec for hot-tier writes.
    pub algorithm: CompressionAlgorithm,

    /// gzip / zlib level (0-9).
    pub deflate_level: u32,

    /// zstd compression level (1-22).
    pub zstd_level: i32,

    /// Minimum trial savings (`1 - compressed/sample`) before compressing.
    pub min_savings_ratio: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
            algorithm: CompressionAlgorithm::Gzip,
            deflate_level: 6,
            zstd_level: 3,
            min_savings_ratio: 0.1,
        }
    }
}

/// Semantic prefetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Dispatch speculative loads after reads.
    pub enabled: bool,

    /// Capacity of the access-history ring.
    pub history_size: usize,

    /// Minimum `prev -> next` repetitions before a pair predicts.
    pub pattern_threshold: u64,

    /// Number of encoder layers in the served model.
    pub encoder_layers: u32,

    /// Object names seeding the name ↔ class table.
    pub known_objects: Vec<String>,

    /// Upper bound on distinct `prev -> next` pairs kept; new pairs past it are ignored.
    pub max_patterns: usize,

    /// Prefetch jobs that may wait for a worker; extra jobs are dropped.
    pub queue_depth: usize,

    /// Prefetch loads running at the same time.
    pub max_concurrent: usize,

    /// Learned patterns are loaded from here at startup and saved on shutdown.
    pub patterns_file: Option<PathBuf>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_size: 100,
            pattern_threshold: 2,
            encoder_layers: 4,
            known_objects: [
                "config.json",
                "embedding.bin",
                "layer0.bin",
                "layer1.bin",
                "layer2.bin",
                "layer3.bin",
                "pooler.bin",
                "classifier.bin",
                "output.bin",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_patterns: 10_000,
            queue_depth: 256,
            max_concurrent: 8,
            patterns_file: None,
        }
    }
}

/// Backend locations and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory served as the authoritative object source.
    pub object_root: PathBuf,

    /// Directory holding the secondary cold store, one sub-directory per bucket.
    pub bucket_root: PathBuf,

    /// Bucket queried in the secondary cold store.
    pub bucket: String,

    /// Upper bound on any single backend call.
    pub io_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_root: PathBuf::from("./models"),
            bucket_root: PathBuf::from("./buckets"),
            bucket: "models".to_string(),
            io_timeout_ms: 2000,
        }
    }
}

impl StorageConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

impl Config {
    /// Load configuration, falling back to defaults on any problem.
    ///
    /// A missing file is a warning. A file that does not parse or validate is
    /// an error-level log, because it silently changes runtime policy.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Config::default();
        }
        match Self::try_load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Ignoring configuration file, using defaults");
                Config::default()
            }
        }
    }

    /// Load and validate configuration, reporting the first problem.
    pub fn try_load(path: &Path) -> Result<Self, TierError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| TierError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        Self::from_json(&data)
    }

    /// Parse and validate configuration from a JSON document.
    pub fn from_json(data: &str) -> Result<Self, TierError> {
        let config: Config =
            serde_json::from_str(data).map_err(|e| TierError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(mode) = cli.mode {
            self.strategy.mode = mode;
        }
    }

    pub fn validate(&self) -> Result<(), TierError> {
        let invalid = |msg: String| Err(TierError::ConfigInvalid(msg));

        for key in self.strategy.tier_table.keys() {
            if !is_policy_key(key) {
                return invalid(format!("unknown tier_table key '{key}'"));
            }
        }
        let ttl = &self.strategy.cache_ttl;
        if ttl.hot_secs == 0 || ttl.warm_secs == 0 || ttl.cold_secs == 0 {
            return invalid("cache_ttl values must be positive".into());
        }
        if self.compression.deflate_level > 9 {
            return invalid(format!("deflate_level {} outside 0-9", self.compression.deflate_level));
        }
        if !(1..=22).contains(&self.compression.zstd_level) {
            return invalid(format!("zstd_level {} outside 1-22", self.compression.zstd_level));
        }
        if !(0.0..=1.0).contains(&self.compression.min_savings_ratio) {
            return invalid("min_savings_ratio must be within 0.0-1.0".into());
        }
        if self.prefetch.history_size == 0 {
            return invalid("prefetch.history_size must be positive".into());
        }
        if self.prefetch.max_patterns == 0 {
            return invalid("prefetch.max_patterns must be positive".into());
        }
        if self.prefetch.encoder_layers == 0 {
            return invalid("prefetch.encoder_layers must be positive".into());
        }
        if self.prefetch.queue_depth == 0 || self.prefetch.max_concurrent == 0 {
            return invalid("prefetch queue_depth and max_concurrent must be positive".into());
        }
        if self.storage.io_timeout_ms == 0 {
            return invalid("storage.io_timeout_ms must be positive".into());
        }
        if self.storage.bucket.is_empty() {
            return invalid("storage.bucket must not be empty".into());
        }
        Ok(())
    }
}

fn is_policy_key(key: &str) -> bool {
    matches!(key, "embedding" | "output" | "config" | "checkpoint" | "other")
        || key
            .strip_prefix("layer")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
