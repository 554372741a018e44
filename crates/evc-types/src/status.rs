use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status kind of a cache operation.
///
/// These are expected outcomes and travel as data on futures; none of them is
/// an error in the Rust sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    NotFound,
    AlreadyExists,
    TimedOut,
    Cancelled,
    BackendError,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Misses and conflicts: the node answered, the key just wasn't in the
    /// expected state.
    pub fn is_key_state(self) -> bool {
        matches!(self, Self::NotFound | Self::AlreadyExists)
    }

    /// Stable upper-case name used in metric names and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotFound => "ERR_NOT_FOUND",
            Self::AlreadyExists => "ERR_EXISTS",
            Self::TimedOut => "TIMEDOUT",
            Self::Cancelled => "CANCELLED",
            Self::BackendError => "ERR_BACKEND",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status code plus the node's (or the client's) human-readable message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    code: StatusCode,
    message: String,
}

impl OperationStatus {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(StatusCode::Success, "OK")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound, "NOT_FOUND")
    }

    pub fn exists() -> Self {
        Self::new(StatusCode::AlreadyExists, "EXISTS")
    }

    pub fn timed_out() -> Self {
        Self::new(StatusCode::TimedOut, "timed out")
    }

    pub fn cancelled() -> Self {
        Self::new(StatusCode::Cancelled, "cancelled")
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BackendError, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.message)
    }
}
