//! Integration tests for the full read path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tensor_tier::cache::{Backends, Coordinator, OperatingMode};
use tensor_tier::config::Config;
use tensor_tier::metrics::{Metrics, ReadSource};
use tensor_tier::storage::{
    DirectoryBucketStore, DirectoryObjectSource, HotTier, MemoryHotTier, MemoryObjectStore,
    ObjectSource, StorageError,
};

fn model_store() -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new("models"));
    store.insert("config.json", br#"{"hidden_size":128}"#.to_vec());
    store.insert("embedding.bin", vec![1u8; 64 * 1024]);
    store.insert("layer0.bin", vec![2u8; 64 * 1024]);
    store.insert("layer1.bin", vec![3u8; 64 * 1024]);
    store
}

fn build(config: Config, hot: Arc<MemoryHotTier>, store: Arc<MemoryObjectStore>) -> Coordinator {
    Coordinator::new(
        config,
        Backends {
            hot,
            source: store.clone(),
            bucket: store,
        },
        Arc::new(Metrics::new().unwrap()),
    )
}

async fn wait_for_prefetch(coord: &Coordinator) {
    for _ in 0..400 {
        let pool = coord.snapshot().pool;
        if pool.in_flight == 0 && pool.completed + pool.failed >= pool.queued {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("prefetch pool never went idle: {:?}", coord.snapshot().pool);
}

#[tokio::test]
async fn test_cold_read_writes_back_then_hits_hot() {
    let hot = Arc::new(MemoryHotTier::new());
    let mut config = Config::default();
    config.prefetch.enabled = false;
    let coord = build(config, hot.clone(), model_store());

    let first = coord.get("embedding.bin", 1024, 0).await.unwrap();
    assert_eq!(first, Bytes::from(vec![1u8; 1024]));
    assert!(hot.get("obj:embedding.bin").await.unwrap().is_some());

    let second = coord.get("embedding.bin", 16, 100).await.unwrap();
    assert_eq!(second.len(), 16);

    let perf = coord.snapshot().performance;
    assert_eq!(perf.total_requests, 2);
    assert_eq!(perf.cold_hits, 1);
    assert_eq!(perf.hot_hits, 1);
    assert_eq!(perf.hot_hit_rate, 0.5);
    assert_eq!(coord.metrics().reads(ReadSource::Hot), 1);
    assert_eq!(coord.metrics().reads(ReadSource::Source), 1);
}

#[tokio::test]
async fn test_prefetch_warms_next_layer() {
    let hot = Arc::new(MemoryHotTier::new());
    let coord = build(Config::default(), hot.clone(), model_store());

    coord.get("embedding.bin", 128, 0).await.unwrap();
    wait_for_prefetch(&coord).await;
    assert!(hot.get("obj:layer0.bin").await.unwrap().is_some());

    let data = coord.get("layer0.bin", 128, 0).await.unwrap();
    assert_eq!(data, Bytes::from(vec![2u8; 128]));

    let snapshot = coord.snapshot();
    assert_eq!(snapshot.performance.prefetch_hits, 1);
    assert_eq!(snapshot.performance.hot_hits, 1);
    assert_eq!(snapshot.prefetch.hits, 1);
    coord.shutdown().await;
}

/// Object source whose first fetch of `gated` blocks until released.
struct GatedSource {
    inner: Arc<MemoryObjectStore>,
    gated: &'static str,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ObjectSource for GatedSource {
    async fn fetch(&self, name: &str) -> Result<Option<Bytes>, StorageError> {
        if name == self.gated && self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.fetch(name).await
    }
}

#[tokio::test]
async fn test_in_flight_prefetch_counts_one_hit() {
    let store = model_store();
    let source = Arc::new(GatedSource {
        inner: store.clone(),
        gated: "layer1.bin",
        armed: AtomicBool::new(true),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let coord = Coordinator::new(
        Config::default(),
        Backends {
            hot: Arc::new(MemoryHotTier::new()),
            source: source.clone(),
            bucket: store,
        },
        Arc::new(Metrics::new().unwrap()),
    );

    assert!(coord.prefetcher().dispatch_prefetch("layer1.bin"));
    assert!(!coord.prefetcher().dispatch_prefetch("layer1.bin"));
    tokio::time::timeout(Duration::from_secs(5), source.entered.notified())
        .await
        .expect("prefetch job never reached the source");

    // The job is parked inside the source while the foreground read runs.
    let data = coord.get("layer1.bin", 64, 0).await.unwrap();
    assert_eq!(data, Bytes::from(vec![3u8; 64]));
    assert!(coord.snapshot().pool.in_flight >= 1);

    let flagged: Vec<bool> = coord
        .prefetcher()
        .history()
        .iter()
        .filter(|r| r.name == "layer1.bin")
        .map(|r| r.was_prefetch_hit)
        .collect();
    assert_eq!(flagged, vec![true]);
    assert_eq!(coord.snapshot().prefetch.hits, 1);

    source.release.notify_one();
    wait_for_prefetch(&coord).await;

    // layer2.bin is predicted from layer1 but exists nowhere, so its job misses.
    let stats = coord.snapshot().prefetch;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_attempts, 2);
    coord.shutdown().await;
}

#[tokio::test]
async fn test_missing_names_leave_no_descriptor() {
    let mut config = Config::default();
    config.prefetch.enabled = false;
    let coord = build(config, Arc::new(MemoryHotTier::new()), model_store());

    for i in 0..16 {
        coord.get(&format!("nope{i}.bin"), 8, 0).await.unwrap();
    }
    coord.get("layer0.bin", 8, 0).await.unwrap();

    let frequencies = coord.snapshot().access_frequencies;
    assert_eq!(frequencies.len(), 1);
    assert_eq!(frequencies.get("layer0.bin"), Some(&1));
}

#[tokio::test]
async fn test_total_miss_returns_bounded_bytes() {
    let coord = build(Config::default(), Arc::new(MemoryHotTier::new()), model_store());

    let data = coord.get("missing.bin", 4096, 0).await.unwrap();
    assert!(data.len() <= 4096);
    assert_eq!(coord.metrics().reads(ReadSource::Placeholder), 1);

    let empty = coord.get("missing.bin", 0, 0).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_cost_saving_skips_hot_tier() {
    let hot = Arc::new(MemoryHotTier::new());
    let mut config = Config::default();
    config.prefetch.enabled = false;
    let coord = build(config, hot.clone(), model_store());
    coord.set_mode(OperatingMode::CostSaving);

    coord.get("embedding.bin", 64, 0).await.unwrap();
    assert!(hot.get("obj:embedding.bin").await.unwrap().is_none());
    assert_eq!(coord.snapshot().performance.mode, OperatingMode::CostSaving);
}

#[tokio::test]
async fn test_concurrent_reads() {
    let coord = Arc::new(build(
        Config::default(),
        Arc::new(MemoryHotTier::new()),
        model_store(),
    ));
    let names = ["embedding.bin", "layer0.bin", "layer1.bin", "config.json"];

    let reads = (0..32).map(|i| {
        let coord = coord.clone();
        let name = names[i % names.len()];
        tokio::spawn(async move { coord.get(name, 256, 0).await })
    });
    for result in futures::future::join_all(reads).await {
        assert!(result.unwrap().is_ok());
    }

    let perf = coord.snapshot().performance;
    assert_eq!(perf.total_requests, 32);
    assert!(perf.hot_hits + perf.cold_hits <= perf.total_requests);
    assert!(perf.hot_hit_rate + perf.cold_hit_rate <= 1.0);
    assert_eq!(coord.snapshot().access_frequencies.values().sum::<u64>(), 32);
    coord.shutdown().await;
}

#[tokio::test]
async fn test_directory_backends_with_bucket_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirectoryObjectSource::new(dir.path().join("models")).await.unwrap();
    let bucket = DirectoryBucketStore::new(dir.path().join("buckets"), "models")
        .await
        .unwrap();

    std::fs::write(source.root().join("layer0.bin"), vec![9u8; 2048]).unwrap();
    bucket
        .put_object("models", "layer3.bin", &[7u8; 2048])
        .await
        .unwrap();

    let mut config = Config::default();
    config.prefetch.enabled = false;
    let coord = Coordinator::new(
        config,
        Backends {
            hot: Arc::new(MemoryHotTier::new()),
            source: Arc::new(source),
            bucket: Arc::new(bucket),
        },
        Arc::new(Metrics::new().unwrap()),
    );

    assert_eq!(coord.get("layer0.bin", 10, 0).await.unwrap(), Bytes::from(vec![9u8; 10]));
    assert_eq!(coord.get("layer3.bin", 10, 2040).await.unwrap(), Bytes::from(vec![7u8; 8]));
    assert_eq!(coord.metrics().reads(ReadSource::Bucket), 1);
}

#[tokio::test]
async fn test_reset_stats() {
    let mut config = Config::default();
    config.prefetch.enabled = false;
    let coord = build(config, Arc::new(MemoryHotTier::new()), model_store());

    coord.get("layer0.bin", 8, 0).await.unwrap();
    coord.reset_stats();

    let snapshot = coord.snapshot();
    assert_eq!(snapshot.performance.total_requests, 0);
    assert_eq!(snapshot.prefetch.total_attempts, 0);
    assert_eq!(snapshot.access_frequencies.get("layer0.bin"), Some(&1));
}
