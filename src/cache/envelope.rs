//! Hot-tier envelope: the unit written under `obj:{name}`.
//!
//! ```text
//! offset  size  field
//! 0       2     magic "TT"
//! 2       1     version (1)
//! 3       1     flags (bit 0 = compressed)
//! 4       1     algorithm tag
//! 5       8     payload length (big-endian)
//! 13      n     payload
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cache::compressor::{CompressionAlgorithm, CompressionError, CompressionManager};

const MAGIC: [u8; 2] = *b"TT";
const VERSION: u8 = 1;
const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const HEADER_LEN: usize = 13;

/// Tagged payload stored in the hot tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEnvelope {
    pub compressed: bool,
    pub algorithm: CompressionAlgorithm,
    pub payload: Bytes,
}

impl CacheEnvelope {
    /// Wrap `data` uncompressed.
    pub fn plain(data: &[u8]) -> Self {
        Self {
            compressed: false,
            algorithm: CompressionAlgorithm::None,
            payload: Bytes::copy_from_slice(data),
        }
    }

    /// Wrap `data`, compressing with the manager's default algorithm.
    ///
    /// If the codec degrades to `None` the envelope is stored plain.
    pub fn compressed(manager: &CompressionManager, data: &[u8]) -> Self {
        let (payload, algorithm) = manager.compress(data, None);
        Self {
            compressed: algorithm != CompressionAlgorithm::None,
            algorithm,
            payload: Bytes::from(payload),
        }
    }

    /// Recover the original bytes.
    pub fn open(&self, manager: &CompressionManager) -> Result<Vec<u8>, CompressionError> {
        if !self.compressed {
            return Ok(self.payload.to_vec());
        }
        manager.decompress(&self.payload, self.algorithm)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(if self.compressed { FLAG_COMPRESSED } else { 0 });
        buf.put_u8(self.algorithm.tag());
        buf.put_u64(self.payload.len() as u64);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, CompressionError> {
        if raw.len() < HEADER_LEN {
            return Err(CompressionError::MalformedEnvelope("truncated header"));
        }
        let mut buf = raw;
        let mut magic = [0u8; 2];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(CompressionError::MalformedEnvelope("bad magic"));
        }
        if buf.get_u8() != VERSION {
            return Err(CompressionError::MalformedEnvelope("unsupported version"));
        }
        let compressed = buf.get_u8() & FLAG_COMPRESSED != 0;
        let algorithm = CompressionAlgorithm::from_tag(buf.get_u8())?;
        let len = buf.get_u64();

        if len != buf.remaining() as u64 {
            return Err(CompressionError::MalformedEnvelope("payload length mismatch"));
        }
        if compressed != (algorithm != CompressionAlgorithm::None) {
            return Err(CompressionError::MalformedEnvelope("flag/algorithm mismatch"));
        }

        Ok(Self {
            compressed,
            algorithm,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
