//! Tests for tier selection across modes and configured tables.

use tensor_tier::cache::layer::LayerClass;
use tensor_tier::cache::strategy::StrategyEngine;
use tensor_tier::cache::{OperatingMode, Tier};
use tensor_tier::config::Config;

fn engine_from_json(json: &str) -> StrategyEngine {
    let config = Config::from_json(json).unwrap();
    StrategyEngine::new(config.strategy, config.compression)
}

#[test]
fn test_cold_layer_promoted_after_threshold() {
    let engine = engine_from_json(
        r#"{ "strategy": { "mode": "performance", "tier_table": { "layer0": "cold" } } }"#,
    );

    assert_eq!(engine.select_tier("layer0", 0), Tier::Cold);
    for _ in 0..4 {
        assert_eq!(engine.select_tier("layer0", 0), Tier::Cold);
    }
    assert_eq!(engine.select_tier("layer0", 0), Tier::Hot);
    assert_eq!(engine.descriptor("layer0").unwrap().access_frequency, 6);
}

#[test]
fn test_custom_thresholds() {
    let engine = engine_from_json(
        r#"{ "strategy": { "mode": "performance", "promote_cold_after": 1 } }"#,
    );
    assert_eq!(engine.select_tier("layer3.bin", 0), Tier::Cold);
    assert_eq!(engine.select_tier("layer3.bin", 0), Tier::Hot);
}

#[test]
fn test_output_family_shares_one_entry() {
    let engine = engine_from_json(r#"{ "strategy": { "mode": "balanced" } }"#);
    for name in ["pooler.bin", "classifier.bin", "lm_head.bin", "output.bin"] {
        assert_eq!(engine.select_tier(name, 0), Tier::Hot, "{name}");
    }
    assert_eq!(engine.base_tier(LayerClass::Checkpoint), Tier::Cold);
}

#[test]
fn test_decide_is_pure() {
    let engine = engine_from_json("{}");
    let class = LayerClass::EncoderLayer(2);
    assert_eq!(engine.decide(class, 1, OperatingMode::Performance), Tier::Warm);
    assert_eq!(engine.decide(class, 3, OperatingMode::Performance), Tier::Hot);
    assert_eq!(engine.decide(class, 1, OperatingMode::CostSaving), Tier::Cold);
    assert_eq!(engine.decide(class, 1, OperatingMode::Balanced), Tier::Warm);
    assert!(engine.access_frequencies().is_empty());
}

#[test]
fn test_ttls_follow_config() {
    let engine = engine_from_json(r#"{ "strategy": { "cache_ttl": { "hot_secs": 60 } } }"#);
    assert_eq!(engine.cache_ttl(Tier::Hot).as_secs(), 60);
    assert_eq!(engine.cache_ttl(Tier::Warm).as_secs(), 1800);
}

#[test]
fn test_compression_disabled() {
    let engine = engine_from_json(r#"{ "compression": { "enabled": false } }"#);
    assert!(!engine.should_compress("layer0.bin", 1 << 20));
}
