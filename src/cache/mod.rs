//! Tier placement, compression and prefetch for tensor files.
//!
//! This module contains the core data structures and algorithms:
//! - [`object`]: Tier, OperatingMode and per-object descriptors
//! - [`layer`]: Name classification, layer dependency graph, name table
//! - [`compressor`]: gzip / zlib / zstd codecs and the compression heuristic
//! - [`envelope`]: Versioned hot-tier envelope format
//! - [`strategy`]: Adaptive tier selection and hit accounting
//! - [`ledger`]: In-flight prefetch bookkeeping
//! - [`tier_io`]: Timeout-bounded backend access shared by reads and prefetch
//! - [`pool`]: Supervised prefetch worker pool
//! - [`prefetcher`]: Successor prediction and prefetch dispatch
//! - [`coordinator`]: The read path tying everything together

pub mod compressor;
pub mod coordinator;
pub mod envelope;
pub mod layer;
pub mod ledger;
pub mod object;
pub mod pool;
pub mod prefetcher;
pub mod strategy;
pub mod tier_io;

pub use coordinator::{extract_range, Coordinator, CoordinatorSnapshot, Placeholder, ZeroFill};
pub use object::{OperatingMode, Tier};
pub use tier_io::Backends;
