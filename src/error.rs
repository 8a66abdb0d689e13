//! Crate-level error taxonomy.
//!
//! Only `InvalidRequest` ever reaches a `get` caller. The other variants are
//! produced internally, logged, and recovered by falling through to the next
//! tier, storing uncompressed, serving a placeholder, or using default
//! configuration.

use thiserror::Error;

use crate::cache::compressor::CompressionError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum TierError {
    /// A hot or cold backend could not be reached or timed out.
    #[error("Backend unavailable ({backend}): {reason}")]
    BackendUnavailable { backend: &'static str, reason: String },

    /// Compression, decompression or envelope decoding failed.
    #[error("Codec failure: {0}")]
    CodecFailure(#[from] CompressionError),

    /// The object is absent from every tier.
    #[error("Object not found in any tier: {0}")]
    NotFound(String),

    /// Policy configuration could not be used.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The caller violated the read contract.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TierError {
    pub fn backend(backend: &'static str, err: StorageError) -> Self {
        TierError::BackendUnavailable {
            backend,
            reason: err.to_string(),
        }
    }

    /// Whether the error is recovered inside the core rather than surfaced.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TierError::InvalidRequest(_))
    }
}
