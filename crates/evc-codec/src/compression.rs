use std::io::Read;

use bytes::Bytes;
use evc_types::CachedData;
use tracing::trace;

use crate::error::{CodecError, CodecResult};
use crate::flags;

/// When and how hard to zstd-compress encoded payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Compression {
    /// Payloads strictly larger than this many bytes are compressed.
    pub threshold: usize,
    /// zstd level.
    pub level: i32,
}

impl Compression {
    pub const DEFAULT_THRESHOLD: usize = 16 * 1024;

    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Never compress.
    pub fn disabled() -> Self {
        Self {
            threshold: usize::MAX,
            ..Self::default()
        }
    }

    /// Tag `bytes` with `type_flag`, compressing when worthwhile, and enforce
    /// the size limit on the result.
    pub fn pack(&self, type_flag: u32, bytes: Vec<u8>, max_size: usize) -> CodecResult<CachedData> {
        let mut flags = type_flag;
        let mut payload = bytes;
        if payload.len() > self.threshold {
            let compressed = zstd::encode_all(payload.as_slice(), self.level)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            // Incompressible data is stored as-is.
            if compressed.len() < payload.len() {
                trace!(
                    raw = payload.len(),
                    compressed = compressed.len(),
                    "compressed payload"
                );
                payload = compressed;
                flags |= flags::COMPRESSED;
            }
        }
        if payload.len() > max_size {
            return Err(CodecError::TooLarge {
                size: payload.len(),
                max: max_size,
            });
        }
        Ok(CachedData::new(flags, payload))
    }

    /// Check the type flag of `data` and return its uncompressed bytes.
    ///
    /// Decompression stops one byte past `max_size`, so a small payload
    /// cannot expand without bound.
    pub fn unpack(&self, expected_type: u32, data: &CachedData, max_size: usize) -> CodecResult<Bytes> {
        let found = flags::type_of(data.flags);
        if found != expected_type {
            return Err(CodecError::FlagMismatch {
                expected: expected_type,
                found,
            });
        }
        if flags::is_compressed(data.flags) {
            let decoder = zstd::stream::read::Decoder::new(data.data.as_ref())
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            let limit = (max_size as u64).saturating_add(1);
            let mut raw = Vec::new();
            decoder
                .take(limit)
                .read_to_end(&mut raw)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
            if raw.len() > max_size {
                return Err(CodecError::TooLarge {
                    size: raw.len(),
                    max: max_size,
                });
            }
            Ok(Bytes::from(raw))
        } else {
            Ok(data.data.clone())
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            level: 3,
        }
    }
}
