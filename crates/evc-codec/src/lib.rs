//! Value codecs for evcache-rs.
//!
//! A [`Transcoder`] converts between an in-memory value and the
//! [`CachedData`](evc_types::CachedData) a node stores: payload bytes plus a
//! 32-bit flags word. The flags record which codec produced the bytes and
//! whether they were compressed, so a reader configured with the wrong codec
//! gets a [`CodecError::FlagMismatch`] instead of garbage.
//!
//! # Transcoders
//!
//! - [`RawTranscoder`] -- passes `CachedData` through untouched
//! - [`BytesTranscoder`] -- opaque byte payloads
//! - [`StringTranscoder`] -- UTF-8 text
//! - [`JsonTranscoder`] -- any serde type, as JSON
//! - [`BincodeTranscoder`] -- any serde type, as bincode
//!
//! All but the raw transcoder compress payloads above a threshold with zstd.

pub mod compression;
pub mod error;
pub mod flags;
pub mod serialized;
pub mod transcoder;

pub use compression::Compression;
pub use error::{CodecError, CodecResult};
pub use serialized::{BincodeTranscoder, JsonTranscoder};
pub use transcoder::{BytesTranscoder, RawTranscoder, StringTranscoder, Transcoder};
