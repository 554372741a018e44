use thiserror::Error;

/// Errors returned synchronously by client entry points and configuration
/// loading.
///
/// Per-operation outcomes (misses, timeouts, node failures) are not errors;
/// they arrive as the status of the returned future.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid key: {0}")]
    InvalidKey(#[from] evc_types::TypeError),

    #[error("codec error: {0}")]
    Codec(#[from] evc_codec::CodecError),

    #[error("transport error: {0}")]
    Transport(#[from] evc_transport::TransportError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
