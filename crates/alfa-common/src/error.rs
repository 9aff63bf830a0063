//! Error types for Alfa
//!
//! This module defines:
//! - `AlfaError`: Application-level error enum used outside the lock core
//! - `AppError`: Wrapper around `anyhow::Error` for binary boundaries
//! - `ExitCode` constants mapping errors to process exit statuses

use std::fmt::{Display, Formatter};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum AlfaError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("lock error: {0}")]
    LockError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl AlfaError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AlfaError::IllegalArgument(_) | AlfaError::ConfigError(_) => CONFIG_INVALID,
            AlfaError::NetworkError(_) => BACKEND_UNAVAILABLE,
            AlfaError::LockError(_) => LOCK_NOT_ACQUIRED,
            AlfaError::InternalError(_) => INTERNAL,
        }
    }
}

/// Wrapper for application errors
#[derive(Debug)]
pub struct AppError {
    inner: anyhow::Error,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError { inner: value }
    }
}

impl AppError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Exit status derived from the wrapped error, `INTERNAL` if it is not an `AlfaError`
    pub fn exit_code(&self) -> ExitCode {
        self.downcast_ref::<AlfaError>()
            .map(AlfaError::exit_code)
            .unwrap_or(INTERNAL)
    }
}

/// Process exit status with a short description
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitCode {
    pub code: i32,
    pub message: &'static str,
}

pub const SUCCESS: ExitCode = ExitCode {
    code: 0,
    message: "success",
};

pub const INTERNAL: ExitCode = ExitCode {
    code: 1,
    message: "internal error",
};

pub const CONFIG_INVALID: ExitCode = ExitCode {
    code: 2,
    message: "invalid configuration",
};

pub const BACKEND_UNAVAILABLE: ExitCode = ExitCode {
    code: 3,
    message: "lock backends unavailable",
};

pub const LOCK_NOT_ACQUIRED: ExitCode = ExitCode {
    code: 4,
    message: "lock not acquired",
};

pub const LOCK_LOST: ExitCode = ExitCode {
    code: 5,
    message: "lock lost while held",
};

/// 128 + SIGINT
pub const INTERRUPTED: ExitCode = ExitCode {
    code: 130,
    message: "interrupted",
};
