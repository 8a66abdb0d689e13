//! Prometheus metrics for reads and prefetch jobs.
//!
//! Each [`Metrics`] owns its own registry so several coordinators (tests,
//! embedded use) never collide on metric names.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Where a foreground read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Hot,
    Source,
    Bucket,
    Placeholder,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Hot => "hot",
            ReadSource::Source => "source",
            ReadSource::Bucket => "bucket",
            ReadSource::Placeholder => "placeholder",
        }
    }
}

/// Terminal state of a prefetch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    AlreadyHot,
    Loaded,
    Missing,
    Dropped,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::AlreadyHot => "already_hot",
            JobOutcome::Loaded => "loaded",
            JobOutcome::Missing => "missing",
            JobOutcome::Dropped => "dropped",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    reads: IntCounterVec,
    prefetch_jobs: IntCounterVec,
    prefetch_in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reads = IntCounterVec::new(
            Opts::new("tensor_tier_reads_total", "Foreground reads by serving source"),
            &["source"],
        )?;
        let prefetch_jobs = IntCounterVec::new(
            Opts::new("tensor_tier_prefetch_jobs_total", "Prefetch jobs by outcome"),
            &["outcome"],
        )?;
        let prefetch_in_flight = IntGauge::new(
            "tensor_tier_prefetch_in_flight",
            "Prefetch loads currently running",
        )?;

        registry.register(Box::new(reads.clone()))?;
        registry.register(Box::new(prefetch_jobs.clone()))?;
        registry.register(Box::new(prefetch_in_flight.clone()))?;

        Ok(Self {
            registry,
            reads,
            prefetch_jobs,
            prefetch_in_flight,
        })
    }

    pub fn record_read(&self, source: ReadSource) {
        self.reads.with_label_values(&[source.as_str()]).inc();
    }

    pub fn record_job(&self, outcome: JobOutcome) {
        self.prefetch_jobs.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn prefetch_in_flight(&self) -> &IntGauge {
        &self.prefetch_in_flight
    }

    pub fn reads(&self, source: ReadSource) -> u64 {
        self.reads.with_label_values(&[source.as_str()]).get()
    }

    pub fn jobs(&self, outcome: JobOutcome) -> u64 {
        self.prefetch_jobs.with_label_values(&[outcome.as_str()]).get()
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
