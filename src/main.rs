//! tensor-tier: tiered storage policy server for model-weight tensor files.
//!
//! Serves tensor files through a hierarchy of storage tiers:
//!   in-memory hot cache → object directory → bucket store
//!
//! Exposes reads, statistics and mode control over HTTP.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tensor_tier::cache::{Backends, Coordinator};
use tensor_tier::config::{Cli, Config};
use tensor_tier::metrics::Metrics;
use tensor_tier::server::api::{build_router, AppState};
use tensor_tier::storage::{DirectoryBucketStore, DirectoryObjectSource, MemoryHotTier};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tensor_tier=debug,tower_http=debug"
    } else {
        "tensor_tier=info,tower_http=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("tensor-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config);
    config.apply_cli(&cli);

    info!(
        mode = %config.strategy.mode,
        object_root = %config.storage.object_root.display(),
        bucket_root = %config.storage.bucket_root.display(),
        bucket = %config.storage.bucket,
        "Configuration loaded"
    );

    // Backends.
    let hot = Arc::new(MemoryHotTier::new());
    let source = Arc::new(DirectoryObjectSource::new(&config.storage.object_root).await?);
    let bucket =
        Arc::new(DirectoryBucketStore::new(&config.storage.bucket_root, &config.storage.bucket).await?);

    let purger = {
        let hot = hot.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                let purged = hot.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = hot.len(), "Purged expired hot-tier entries");
                }
            }
        })
    };

    // Coordinator.
    let metrics = Arc::new(Metrics::new()?);
    let patterns_file = config.prefetch.patterns_file.clone();
    let listen_addr = config.server.listen.clone();
    let coordinator = Arc::new(Coordinator::new(
        config,
        Backends { hot, source, bucket },
        metrics,
    ));

    if let Some(path) = &patterns_file {
        if path.exists() {
            coordinator.prefetcher().load_patterns(path).await;
        }
    }

    // Build the HTTP router.
    let app = build_router(Arc::new(AppState::new(coordinator.clone())));

    // Start the server.
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    purger.abort();
    coordinator.shutdown().await;

    if let Some(path) = &patterns_file {
        if let Err(e) = coordinator.prefetcher().save_patterns(path).await {
            warn!(path = %path.display(), error = %e, "Failed to save access patterns");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
