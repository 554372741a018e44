use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An encoded payload as it travels to and from a node: raw bytes plus the
/// codec flags that say how to decode them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedData {
    pub flags: u32,
    pub data: Bytes,
}

impl CachedData {
    /// Largest payload a codec will produce (20 MiB).
    pub const MAX_SIZE: usize = 20 * 1024 * 1024;

    pub fn new(flags: u32, data: impl Into<Bytes>) -> Self {
        Self {
            flags,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A decoded value together with the CAS token the node returned for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CasValue<T> {
    pub cas: u64,
    pub value: T,
}

impl<T> CasValue<T> {
    pub fn new(cas: u64, value: T) -> Self {
        Self { cas, value }
    }
}
