//! # dynadump Utilities
//!
//! Shared utilities for the dynadump workspace.
//!
//! Right now that is the logging setup used by the CLI and by tests that
//! want readable output: a `tracing` subscriber writing to stderr, with
//! optional JSON formatting and file output.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_with_config, init_logging_with_level, LogFormat, LogLevel, LoggingConfig, LoggingError,
    LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
