use bytes::Bytes;
use evc_types::CachedData;

use crate::compression::Compression;
use crate::error::{CodecError, CodecResult};
use crate::flags;

/// Converts values of type `T` to and from their stored representation.
///
/// Implementations must be shareable across the transport's worker threads:
/// bulk gets decode every shard's payloads concurrently with one transcoder.
pub trait Transcoder<T>: Send + Sync {
    /// Encode a value for storage.
    fn encode(&self, value: &T) -> CodecResult<CachedData>;

    /// Decode a stored payload.
    ///
    /// Returns `Err` when the payload was written by another codec or is
    /// corrupt; it never panics on bad input.
    fn decode(&self, data: &CachedData) -> CodecResult<T>;

    /// Largest encoded payload this transcoder will produce.
    fn max_size(&self) -> usize {
        CachedData::MAX_SIZE
    }
}

/// Pass-through transcoder for callers that already hold encoded data.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawTranscoder;

impl Transcoder<CachedData> for RawTranscoder {
    fn encode(&self, value: &CachedData) -> CodecResult<CachedData> {
        if value.len() > self.max_size() {
            return Err(CodecError::TooLarge {
                size: value.len(),
                max: self.max_size(),
            });
        }
        Ok(value.clone())
    }

    fn decode(&self, data: &CachedData) -> CodecResult<CachedData> {
        Ok(data.clone())
    }
}

/// Opaque byte payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesTranscoder {
    compression: Compression,
}

impl BytesTranscoder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl Transcoder<Bytes> for BytesTranscoder {
    fn encode(&self, value: &Bytes) -> CodecResult<CachedData> {
        self.compression
            .pack(flags::TYPE_BYTES, value.to_vec(), self.max_size())
    }

    fn decode(&self, data: &CachedData) -> CodecResult<Bytes> {
        self.compression.unpack(flags::TYPE_BYTES, data, self.max_size())
    }
}

/// UTF-8 strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringTranscoder {
    compression: Compression,
}

impl StringTranscoder {
    pub fn new(compression: Compression) -> Self {
        Self { compression }
    }
}

impl Transcoder<String> for StringTranscoder {
    fn encode(&self, value: &String) -> CodecResult<CachedData> {
        self.compression
            .pack(flags::TYPE_STRING, value.as_bytes().to_vec(), self.max_size())
    }

    fn decode(&self, data: &CachedData) -> CodecResult<String> {
        let bytes = self.compression.unpack(flags::TYPE_STRING, data, self.max_size())?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_is_identity() {
        let data = CachedData::new(99, b"abc".to_vec());
        let tc = RawTranscoder;
        assert_eq!(tc.encode(&data).unwrap(), data);
        assert_eq!(tc.decode(&data).unwrap(), data);
    }

    #[test]
    fn bytes_roundtrip() {
        let tc = BytesTranscoder::default();
        let value = Bytes::from_static(b"\x00\x01\x02");
        let encoded = tc.encode(&value).unwrap();
        assert_eq!(flags::type_of(encoded.flags), flags::TYPE_BYTES);
        assert_eq!(tc.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn string_roundtrip_with_compression() {
        let tc = StringTranscoder::new(Compression::new(16));
        let value = "hello ".repeat(100);
        let encoded = tc.encode(&value).unwrap();
        assert!(flags::is_compressed(encoded.flags));
        assert_eq!(tc.decode(&encoded).unwrap(), value);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let tc = StringTranscoder::default();
        let data = CachedData::new(flags::TYPE_STRING, vec![0xff, 0xfe]);
        assert!(matches!(tc.decode(&data), Err(CodecError::Deserialization(_))));
    }

    #[test]
    fn string_decoder_refuses_bytes_payload() {
        let bytes = BytesTranscoder::default()
            .encode(&Bytes::from_static(b"x"))
            .unwrap();
        let err = StringTranscoder::default().decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            CodecError::FlagMismatch {
                expected: flags::TYPE_STRING,
                found: flags::TYPE_BYTES,
            }
        );
    }
}
