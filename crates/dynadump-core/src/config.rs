//! # Probe Configuration
//!
//! Settings that used to be process-wide flags, gathered into one value that
//! is built once at startup and only read afterwards.

use std::time::Duration;

use crate::canonical::Canonicalizer;
use crate::unwind::DEFAULT_MAX_DEPTH;

/// Default bound on how long `uninstall()` waits for the receiver thread.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Read-only configuration shared by the monitor and the orchestrator.
///
/// ```rust
/// use std::time::Duration;
///
/// use dynadump_core::config::ProbeConfig;
///
/// let config = ProbeConfig::default()
///     .with_verify_progress(true)
///     .with_teardown_timeout(Duration::from_millis(250));
/// assert!(config.verify_progress);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig
{
    /// Log every exception message, not just stepped-over faults.
    pub verbose: bool,
    /// Single-step once after each stepover to confirm forward progress.
    pub verify_progress: bool,
    /// How long teardown waits for the receiver before reclaiming the port.
    pub teardown_timeout: Duration,
    /// Bound on frames walked for a fatal backtrace.
    pub max_backtrace_depth: usize,
    /// Pointer canonicalization used everywhere addresses are compared.
    pub canonicalizer: Canonicalizer,
}

impl ProbeConfig
{
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self
    {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_verify_progress(mut self, verify: bool) -> Self
    {
        self.verify_progress = verify;
        self
    }

    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self
    {
        self.teardown_timeout = timeout;
        self
    }

    /// Depth is clamped to at least one frame.
    #[must_use]
    pub fn with_max_backtrace_depth(mut self, depth: usize) -> Self
    {
        self.max_backtrace_depth = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self
    {
        self.canonicalizer = canonicalizer;
        self
    }
}

impl Default for ProbeConfig
{
    fn default() -> Self
    {
        Self {
            verbose: false,
            verify_progress: false,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            max_backtrace_depth: DEFAULT_MAX_DEPTH,
            canonicalizer: Canonicalizer::native(),
        }
    }
}
