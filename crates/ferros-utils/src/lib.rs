//! # Ferros Utilities
//!
//! Shared logging setup for the Ferros workspace, built on `tracing`.
//!
//! Library crates such as `ferros-frames` only emit events; binaries call
//! [`init_logging`] once at startup and tests call [`init_test_logging`].

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    frame_debug_enabled, init_logging, init_logging_with_level, init_test_logging, LogFormat, LogGuard, LogLevel,
    LoggingError,
};
pub use tracing::{debug, error, info, trace, warn};
