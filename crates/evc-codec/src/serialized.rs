use std::marker::PhantomData;

use evc_types::CachedData;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::compression::Compression;
use crate::error::{CodecError, CodecResult};
use crate::flags;
use crate::transcoder::Transcoder;

/// Any serde type, stored as JSON.
pub struct JsonTranscoder<T> {
    compression: Compression,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonTranscoder<T> {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonTranscoder<T> {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl<T> Transcoder<T> for JsonTranscoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CodecResult<CachedData> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
        self.compression.pack(flags::TYPE_JSON, bytes, self.max_size())
    }

    fn decode(&self, data: &CachedData) -> CodecResult<T> {
        let bytes = self.compression.unpack(flags::TYPE_JSON, data, self.max_size())?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

/// Any serde type, stored as bincode. Smaller and faster than JSON, but only
/// readable by a reader with the exact same type definition.
pub struct BincodeTranscoder<T> {
    compression: Compression,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeTranscoder<T> {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeTranscoder<T> {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl<T> Transcoder<T> for BincodeTranscoder<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CodecResult<CachedData> {
        let bytes =
            bincode::serialize(value).map_err(|e| CodecError::Serialization(e.to_string()))?;
        self.compression.pack(flags::TYPE_BINCODE, bytes, self.max_size())
    }

    fn decode(&self, data: &CachedData) -> CodecResult<T> {
        let bytes = self.compression.unpack(flags::TYPE_BINCODE, data, self.max_size())?;
        bincode::deserialize(&bytes).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}
