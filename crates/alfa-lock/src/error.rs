//! Error types for the lock subsystem

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A single backend call failed or timed out. Counted as a non-success.
    #[error("backend '{backend}' unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    /// An acquisition or extension round did not reach a valid quorum
    #[error("quorum not reached for '{key}': {successes}/{required} backends")]
    QuorumNotReached {
        key: String,
        successes: usize,
        required: usize,
    },

    /// The lease can no longer be trusted. Start over with a new acquisition.
    #[error("lock '{key}' lost")]
    LockLost { key: String },

    #[error("timed out acquiring '{key}' after {waited:?} ({attempts} attempts)")]
    AcquireTimeout {
        key: String,
        waited: Duration,
        attempts: u32,
    },

    #[error("invalid lock configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    pub fn unreachable(backend: impl Into<String>, reason: impl ToString) -> Self {
        LockError::BackendUnreachable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Is a fresh acquisition worth attempting?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockError::BackendUnreachable { .. }
                | LockError::QuorumNotReached { .. }
                | LockError::AcquireTimeout { .. }
        )
    }
}
