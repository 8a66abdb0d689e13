//! Prefetch worker pool.
//!
//! Jobs enter a bounded queue; a dispatcher task pulls them and runs each
//! load under a semaphore permit, so at most `max_concurrent` backend loads
//! overlap with foreground reads. A full queue drops the job rather than
//! blocking the reader that triggered it.
//!
//! Per job:
//!
//! ```text
//! hot tier has it        → success (already hot)
//! authoritative source   → write-through to hot, success
//! secondary cold store   → write-through to hot, success
//! nothing                → miss
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ledger::{PrefetchLedger, PrefetchTicket};
use crate::cache::object::Tier;
use crate::cache::tier_io::TierIo;
use crate::config::PrefetchConfig;
use crate::metrics::{JobOutcome, Metrics};

#[derive(Debug, Default)]
struct PoolCounters {
    queued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicU64,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub queued: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub cancelled: u64,
    pub in_flight: u64,
}

struct Shared {
    io: Arc<TierIo>,
    ledger: Arc<PrefetchLedger>,
    metrics: Arc<Metrics>,
    counters: PoolCounters,
}

impl Shared {
    fn abandon(&self, ticket: &PrefetchTicket, outcome: JobOutcome) {
        self.ledger.release(ticket);
        let counter = match outcome {
            JobOutcome::Dropped => &self.counters.dropped,
            _ => &self.counters.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_job(outcome);
    }

    async fn run(&self, ticket: PrefetchTicket) {
        let name = ticket.name.as_str();
        let outcome = if self.io.read_hot(name).await.is_some() {
            JobOutcome::AlreadyHot
        } else {
            let data = match self.io.fetch_source(name).await {
                Some(data) => Some(data),
                None => self.io.fetch_bucket(name).await,
            };
            match data {
                Some(data) => {
                    self.io.write_hot(name, &data, Tier::Hot).await;
                    JobOutcome::Loaded
                }
                None => JobOutcome::Missing,
            }
        };

        match outcome {
            JobOutcome::Missing => {
                warn!(name, "Prefetch found no data");
                self.ledger.fail(&ticket);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                debug!(name, outcome = outcome.as_str(), "Prefetch complete");
                self.ledger.complete_success(&ticket);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics.record_job(outcome);
    }
}

/// Supervised background executor for prefetch loads.
pub struct PrefetchPool {
    sender: mpsc::Sender<PrefetchTicket>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PrefetchPool {
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn start(
        config: &PrefetchConfig,
        io: Arc<TierIo>,
        ledger: Arc<PrefetchLedger>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let shared = Arc::new(Shared {
            io,
            ledger,
            metrics,
            counters: PoolCounters::default(),
        });
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        let handle = tokio::spawn(dispatch(receiver, shared.clone(), semaphore, cancel.clone()));
        info!(
            queue_depth = config.queue_depth,
            max_concurrent = config.max_concurrent,
            "Prefetch pool started"
        );

        Self {
            sender,
            shared,
            cancel,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn submit(&self, ticket: PrefetchTicket) -> bool {
        if self.cancel.is_cancelled() {
            self.shared.abandon(&ticket, JobOutcome::Cancelled);
            return false;
        }
        match self.sender.try_send(ticket) {
            Ok(()) => {
                self.shared.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(ticket)) => {
                debug!(name = %ticket.name, "Prefetch queue full, dropping job");
                self.shared.abandon(&ticket, JobOutcome::Dropped);
                false
            }
            Err(mpsc::error::TrySendError::Closed(ticket)) => {
                self.shared.abandon(&ticket, JobOutcome::Cancelled);
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            queued: c.queued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting work, cancel queued jobs and wait for running loads.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Prefetch dispatcher ended abnormally");
            }
            info!("Prefetch pool stopped");
        }
    }
}

impl Drop for PrefetchPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<PrefetchTicket>,
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let mut running = JoinSet::new();

    loop {
        while running.try_join_next().is_some() {}

        let ticket = tokio::select! {
            _ = cancel.cancelled() => break,
            ticket = receiver.recv() => match ticket {
                Some(ticket) => ticket,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                shared.abandon(&ticket, JobOutcome::Cancelled);
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    shared.abandon(&ticket, JobOutcome::Cancelled);
                    break;
                }
            },
        };

        let job = shared.clone();
        job.counters.in_flight.fetch_add(1, Ordering::Relaxed);
        job.metrics.prefetch_in_flight().inc();
        running.spawn(async move {
            job.run(ticket).await;
            job.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
            job.metrics.prefetch_in_flight().dec();
            drop(permit);
        });
    }

    receiver.close();
    while let Ok(ticket) = receiver.try_recv() {
        shared.abandon(&ticket, JobOutcome::Cancelled);
    }
    while running.join_next().await.is_some() {}
}
