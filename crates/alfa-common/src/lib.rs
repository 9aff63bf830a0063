//! Alfa Common - Shared types and utilities
//!
//! This crate provides the foundational types used across Alfa components:
//! - Error types and process exit codes
//! - Utility functions
//! - Common constants

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{AlfaError, AppError, ExitCode};
pub use utils::{current_timestamp, redact_url};

/// Application name used in log files and metric prefixes
pub const APP_NAME: &str = "alfa";

/// Redis logical database reserved for lock keys
pub const DEFAULT_LOCKS_DB: u8 = 1;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;
