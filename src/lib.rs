//! tensor-tier: tiered storage policy for model-weight tensor files.
//!
//! Serves named tensor files from a hierarchy of tiers:
//!   hot key-value cache (memory speed) → authoritative object source →
//!   secondary cold object store
//!
//! Placement adapts to access frequency and an operating mode, hot-tier
//! payloads are compressed when it pays off, and successors in the forward
//! pass are prefetched into the hot tier before they are read.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod storage;

pub use cache::{Backends, Coordinator, OperatingMode, Tier};
pub use config::Config;
pub use error::TierError;
