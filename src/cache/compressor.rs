//! Compression for hot-tier writes.
//!
//! Stateless codec selection and execution. Compression is never allowed to
//! lose data: any encoder failure degrades to storing the original bytes
//! tagged [`CompressionAlgorithm::None`].

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CompressionConfig;

/// Inputs below this size are never compressed.
pub const MIN_COMPRESS_BYTES: usize = 1024;

/// Upper bound on the prefix used for the trial compression in
/// [`CompressionManager::should_compress`].
pub const SAMPLE_BYTES: usize = 8192;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Codec I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed cache envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("Unknown algorithm tag {0}")]
    UnknownAlgorithm(u8),
}

/// Codec applied to a hot-tier payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Gzip,
    Zlib,
    Zstd,
}

impl CompressionAlgorithm {
    /// Tag byte used in the envelope header.
    pub fn tag(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Gzip => 1,
            CompressionAlgorithm::Zlib => 2,
            CompressionAlgorithm::Zstd => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, CompressionError> {
        match tag {
            0 => Ok(CompressionAlgorithm::None),
            1 => Ok(CompressionAlgorithm::Gzip),
            2 => Ok(CompressionAlgorithm::Zlib),
            3 => Ok(CompressionAlgorithm::Zstd),
            other => Err(CompressionError::UnknownAlgorithm(other)),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Zlib => write!(f, "zlib"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
        }
    }
}

/// Selects and runs codecs for hot-tier payloads.
#[derive(Debug, Clone)]
pub struct CompressionManager {
    config: CompressionConfig,
}

impl CompressionManager {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn default_algorithm(&self) -> CompressionAlgorithm {
        self.config.algorithm
    }

    /// Compress `data` with `algorithm`, or the configured default.
    ///
    /// Returns the payload and the algorithm actually applied. Empty input and
    /// [`CompressionAlgorithm::None`] pass through unchanged; encoder failures
    /// return the original bytes tagged `None`.
    pub fn compress(
        &self,
        data: &[u8],
        algorithm: Option<CompressionAlgorithm>,
    ) -> (Vec<u8>, CompressionAlgorithm) {
        let algorithm = algorithm.unwrap_or(self.config.algorithm);
        if algorithm == CompressionAlgorithm::None || data.is_empty() {
            return (data.to_vec(), CompressionAlgorithm::None);
        }

        match self.encode(data, algorithm) {
            Ok(compressed) => {
                debug!(
                    algorithm = %algorithm,
                    original = data.len(),
                    compressed = compressed.len(),
                    ratio = compressed.len() as f64 / data.len() as f64,
                    "Compressed payload"
                );
                (compressed, algorithm)
            }
            Err(e) => {
                warn!(algorithm = %algorithm, error = %e, "Compression failed, storing uncompressed");
                (data.to_vec(), CompressionAlgorithm::None)
            }
        }
    }

    /// Reverse [`compress`](Self::compress).
    pub fn decompress(
        &self,
        payload: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<Vec<u8>, CompressionError> {
        if algorithm == CompressionAlgorithm::None || payload.is_empty() {
            return Ok(payload.to_vec());
        }

        let mut out = Vec::with_capacity(payload.len() * 2);
        match algorithm {
            CompressionAlgorithm::Gzip => {
                GzDecoder::new(payload).read_to_end(&mut out)?;
            }
            CompressionAlgorithm::Zlib => {
                ZlibDecoder::new(payload).read_to_end(&mut out)?;
            }
            CompressionAlgorithm::Zstd => {
                out = zstd::decode_all(payload)?;
            }
            CompressionAlgorithm::None => return Ok(payload.to_vec()),
        }

        debug!(algorithm = %algorithm, compressed = payload.len(), size = out.len(), "Decompressed payload");
        Ok(out)
    }

    /// Whether compressing `data` is worth it.
    ///
    /// Rejects anything under [`MIN_COMPRESS_BYTES`]; otherwise trial-compresses
    /// at most [`SAMPLE_BYTES`] of prefix and requires
    /// `1 - compressed/sample >= min_savings_ratio`.
    pub fn should_compress(&self, data: &[u8], min_savings_ratio: f64) -> bool {
        if data.len() < MIN_COMPRESS_BYTES {
            return false;
        }

        let sample = &data[..data.len().min(SAMPLE_BYTES)];
        let (compressed, used) = self.compress(sample, None);
        if used == CompressionAlgorithm::None {
            return false;
        }

        let savings = 1.0 - compressed.len() as f64 / sample.len() as f64;
        savings >= min_savings_ratio
    }

    fn encode(
        &self,
        data: &[u8],
        algorithm: CompressionAlgorithm,
    ) -> Result<Vec<u8>, CompressionError> {
        let level = Compression::new(self.config.deflate_level.min(9));
        match algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            CompressionAlgorithm::Zstd => Ok(zstd::encode_all(data, self.config.zstd_level)?),
            CompressionAlgorithm::None => Ok(data.to_vec()),
        }
    }
}
