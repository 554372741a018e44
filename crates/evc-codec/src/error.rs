/// Errors produced while encoding or decoding cached values.
///
/// `Clone` so that a decode failure can be stored on a completed future and
/// handed to every reader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored bytes could not be deserialized into the requested type.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The payload was written by a different codec.
    #[error("flag mismatch: expected type flags {expected:#06x}, found {found:#06x}")]
    FlagMismatch { expected: u32, found: u32 },

    /// The encoded payload exceeds the transcoder's size limit.
    #[error("encoded payload is {size} bytes, maximum is {max}")]
    TooLarge { size: usize, max: usize },

    /// zstd compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),
}

/// Convenience alias used throughout the codec crate.
pub type CodecResult<T> = std::result::Result<T, CodecError>;
