//! Completion primitives for evcache-rs.
//!
//! - [`OperationFuture`] -- single-assignment result of one operation, with
//!   blocking, polling, async and listener access
//! - [`BulkGetFuture`] -- fan-in of per-shard chunks of a multi-key get
//! - [`WriteLatch`] -- acknowledgment tracking across replica writes
//!
//! All three are completed from transport threads and are safe to share.

pub mod bulk;
pub mod future;
pub mod latch;

pub use bulk::{BulkGetFuture, BulkResult};
pub use future::{Completion, OperationFuture};
pub use latch::{LatchCounts, LatchPolicy, WriteLatch};
