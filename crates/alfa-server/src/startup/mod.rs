//! Application startup utilities module.

mod logging;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, run_with_shutdown, wait_for_shutdown_signal};
