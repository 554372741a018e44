use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Time-ordered identifier for a submitted operation (UUID v7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(uuid::Uuid);

impl OperationId {
    /// Generate a new time-ordered operation ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// Which flavour of unconditional/conditional store to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreType {
    /// Store regardless of whether the key exists.
    Set,
    /// Store only if the key does not exist.
    Add,
    /// Store only if the key already exists.
    Replace,
}

impl StoreType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Set => "Set",
            Self::Add => "Add",
            Self::Replace => "Replace",
        }
    }
}

/// Which end of an existing value a fragment is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcatType {
    Append,
    Prepend,
}

/// Direction of a counter mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutator {
    Incr,
    Decr,
}

impl Mutator {
    pub fn name(self) -> &'static str {
        match self {
            Self::Incr => "Incr",
            Self::Decr => "Decr",
        }
    }
}

/// The request half of an operation: what to do, and to which key(s).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Get {
        key: String,
    },
    GetBulk {
        keys: Vec<String>,
    },
    GetAndTouch {
        key: String,
        exp: u32,
    },
    Store {
        store_type: StoreType,
        key: String,
        flags: u32,
        exp: u32,
        data: Bytes,
    },
    Concat {
        concat_type: ConcatType,
        key: String,
        data: Bytes,
    },
    Delete {
        key: String,
    },
    Touch {
        key: String,
        exp: u32,
    },
    Mutate {
        mutator: Mutator,
        key: String,
        by: u64,
        /// Value to create the counter with when it is missing. `None` makes
        /// a missing counter a `NotFound`.
        default: Option<u64>,
        exp: u32,
    },
}

/// One low-level request bound for a single node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    id: OperationId,
    kind: OperationKind,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            kind,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn into_kind(self) -> OperationKind {
        self.kind
    }

    /// Every key this operation touches, in request order.
    pub fn keys(&self) -> Vec<&str> {
        match &self.kind {
            OperationKind::GetBulk { keys } => keys.iter().map(String::as_str).collect(),
            OperationKind::Get { key }
            | OperationKind::GetAndTouch { key, .. }
            | OperationKind::Store { key, .. }
            | OperationKind::Concat { key, .. }
            | OperationKind::Delete { key }
            | OperationKind::Touch { key, .. }
            | OperationKind::Mutate { key, .. } => vec![key.as_str()],
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            OperationKind::Get { .. } => "get",
            OperationKind::GetBulk { .. } => "get_bulk",
            OperationKind::GetAndTouch { .. } => "get_and_touch",
            OperationKind::Store { store_type, .. } => match store_type {
                StoreType::Set => "set",
                StoreType::Add => "add",
                StoreType::Replace => "replace",
            },
            OperationKind::Concat { concat_type, .. } => match concat_type {
                ConcatType::Append => "append",
                ConcatType::Prepend => "prepend",
            },
            OperationKind::Delete { .. } => "delete",
            OperationKind::Touch { .. } => "touch",
            OperationKind::Mutate { mutator, .. } => match mutator {
                Mutator::Incr => "incr",
                Mutator::Decr => "decr",
            },
        }
    }
}
