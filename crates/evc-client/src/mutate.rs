use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use evc_ops::{Completion, OperationFuture};
use evc_transport::{OperationCallback, Reply};
use evc_types::{OperationStatus, StatusCode};
use serde::Serialize;
use tracing::warn;

/// How a counter mutation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    /// The node applied the mutation; `value` is the new counter value.
    Applied,
    /// The node answered with a failure status; `value` is `-1`.
    Rejected(StatusCode),
    /// No answer within the mutate timeout; `value` is whatever had been
    /// recorded, `0` if nothing.
    Unknown,
}

/// The result of a blocking increment or decrement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MutationResult {
    pub value: i64,
    pub outcome: MutationOutcome,
}

impl MutationResult {
    pub fn is_applied(&self) -> bool {
        self.outcome == MutationOutcome::Applied
    }
}

/// Records the counter value as soon as it arrives, then signals the
/// blocked caller with that value, or `-1` on a failed status.
///
/// `recorded` only ever holds a server-reported value, so a caller that gave
/// up waiting never reads the failure sentinel from a late answer.
pub(crate) struct MutateCallback {
    pub(crate) recorded: Arc<AtomicI64>,
    pub(crate) signal: OperationFuture<i64>,
    pub(crate) overflow: Option<u64>,
}

impl MutateCallback {
    pub(crate) fn new(recorded: Arc<AtomicI64>, signal: OperationFuture<i64>) -> Self {
        Self {
            recorded,
            signal,
            overflow: None,
        }
    }
}

impl OperationCallback for MutateCallback {
    fn received(&mut self, reply: Reply) {
        let Reply::Counter(value) = reply else {
            return;
        };
        match i64::try_from(value) {
            Ok(value) => self.recorded.store(value, Ordering::Release),
            Err(_) => {
                warn!(key = self.signal.key(), value, "counter value does not fit in i64");
                self.overflow = Some(value);
            }
        }
    }

    fn completed(self: Box<Self>, status: OperationStatus) {
        let status = match self.overflow {
            Some(value) if status.is_success() => {
                OperationStatus::backend(format!("counter value {value} exceeds i64::MAX"))
            }
            _ => status,
        };
        let value = if status.is_success() {
            self.recorded.load(Ordering::Acquire)
        } else {
            -1
        };
        self.signal.complete(Some(value), status);
    }
}

/// Turn what the blocked caller observed into a result. `None` means the
/// wait timed out.
pub(crate) fn resolve(recorded: &AtomicI64, completion: Option<&Completion<i64>>) -> MutationResult {
    let Some(completion) = completion else {
        return MutationResult {
            value: recorded.load(Ordering::Acquire),
            outcome: MutationOutcome::Unknown,
        };
    };
    let value = completion.value().ok().flatten().copied().unwrap_or(-1);
    let status = completion.status();
    let outcome = if status.is_success() {
        MutationOutcome::Applied
    } else {
        MutationOutcome::Rejected(status.code())
    };
    MutationResult { value, outcome }
}
