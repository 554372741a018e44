//! Transport and routing boundaries for evcache-rs.
//!
//! The coordination engine never talks to sockets. It hands an
//! [`Operation`](evc_types::Operation) and an [`OperationCallback`] to a
//! [`Transport`], and asks a [`NodeLocator`] which [`CacheNode`] owns a key.
//!
//! # Contracts
//!
//! - A transport delivers zero or more [`Reply`] notifications for an
//!   operation, then exactly one terminal [`OperationCallback::completed`].
//!   The terminal call consumes the callback, so a second one cannot be
//!   expressed.
//! - Notifications for one operation arrive in order; notifications for
//!   different operations may interleave on different threads.
//!
//! # Implementations
//!
//! - [`InMemoryTransport`] -- one worker thread per node, memcached semantics
//! - [`ScriptedTransport`] -- records submissions and answers from a script
//! - [`HashLocator`] / [`StaticLocator`] -- simple routers

pub mod callback;
pub mod error;
pub mod locator;
pub mod memory;
pub mod node;
pub mod scripted;
pub mod traits;

pub use callback::{OperationCallback, Reply};
pub use error::{TransportError, TransportResult};
pub use locator::{HashLocator, StaticLocator};
pub use memory::{InMemoryTransport, NodeBehavior};
pub use node::{CacheNode, NodeId, NodeRef};
pub use scripted::{HeldOperation, Script, ScriptedTransport, Submission};
pub use traits::{NodeLocator, OperationHandle, Transport};
