//! # Error Types
//!
//! Errors returned by the load probe and the image helpers.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Only setup failures and the final load outcome ever reach a caller. Fault
//! classification and resumption decisions stay inside the exception monitor,
//! and teardown problems are logged rather than returned.

use thiserror::Error;

use crate::types::FaultRecord;

/// Main error type for probe operations
///
/// ## Error Categories
///
/// 1. **Setup errors**: Setup, Mach (the monitor could not be armed)
/// 2. **Load errors**: LoadFailed (the load primitive reported failure)
/// 3. **Argument errors**: InvalidArgument
/// 4. **Platform errors**: Unsupported
/// 5. **Image errors**: Image, Io (on-disk inspection)
#[derive(Error, Debug)]
pub enum ProbeError
{
    /// The exception monitor could not be installed
    ///
    /// The load primitive is never invoked when this is returned: a load
    /// without an armed monitor would leave faults uncovered.
    #[error("Failed to arm exception monitor: {0}")]
    Setup(String),

    /// macOS-specific Mach API error
    ///
    /// This wraps errors from the Mach kernel APIs used while arming the
    /// monitor (`mach_port_allocate`, `thread_swap_exception_ports`, ...).
    ///
    /// See: [Mach Kernel Return Codes](https://developer.apple.com/documentation/kernel/kern_return_t)
    #[cfg(target_os = "macos")]
    #[error("Mach API error: {0}")]
    Mach(#[from] crate::platform::macos::error::MachError),

    /// The dynamic loader returned no handle
    ///
    /// `reason` is the loader's own message (`dlerror()` for the default
    /// loader). `fault` is the last fault that was stepped over during the
    /// attempt, if any, which usually explains why the loader gave up.
    #[error("Failed to load image: {reason}")]
    LoadFailed
    {
        /// Message reported by the loader
        reason: String,
        /// Last recoverable fault observed during the attempt
        fault: Option<FaultRecord>,
    },

    /// Invalid argument passed to a probe function
    ///
    /// Examples:
    /// - An image identifier containing an interior NUL byte
    /// - An unparsable stepover address
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The host platform has no exception-port mechanism we can drive
    #[error("Unsupported platform: {0}")]
    Unsupported(&'static str),

    /// An on-disk image could not be parsed
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error (reading image files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProbeError
{
    /// Returns `true` if the probe never reached the load primitive.
    #[must_use]
    pub fn is_setup_failure(&self) -> bool
    {
        match self {
            ProbeError::Setup(_) | ProbeError::Unsupported(_) | ProbeError::InvalidArgument(_) => true,
            #[cfg(target_os = "macos")]
            ProbeError::Mach(_) => true,
            _ => false,
        }
    }
}

/// Convenience type alias for `Result<T, ProbeError>`
///
/// ```rust
/// use dynadump_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, ProbeError>;
