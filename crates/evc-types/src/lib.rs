//! Foundation types for evcache-rs.
//!
//! This crate provides the vocabulary shared by every other `evc-*` crate:
//! what an operation is, how its terminal status is reported, what a cached
//! payload looks like on its way to and from a node, and which keys are legal.
//!
//! # Key Types
//!
//! - [`Operation`] / [`OperationKind`]: One low-level request against one node
//! - [`OperationId`]: UUID v7 identifier, time-ordered across a process
//! - [`StatusCode`] / [`OperationStatus`]: Terminal outcome carried as data
//! - [`CachedData`]: Encoded bytes plus codec flags
//! - [`CasValue`]: A decoded value paired with its CAS token

pub mod data;
pub mod error;
pub mod key;
pub mod operation;
pub mod status;

pub use data::{CachedData, CasValue};
pub use error::TypeError;
pub use key::{validate_key, MAX_KEY_LENGTH};
pub use operation::{ConcatType, Mutator, Operation, OperationId, OperationKind, StoreType};
pub use status::{OperationStatus, StatusCode};
