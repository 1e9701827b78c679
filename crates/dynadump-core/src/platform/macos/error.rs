//! # macOS Mach API Errors
//!
//! Error types for macOS Mach API operations.
//!
//! Mach APIs return `kern_return_t` values, which are integer error codes.
//! This module converts those codes into Rust error types with descriptive
//! messages. `mach_msg()` returns its own family of codes (`MACH_SEND_*`,
//! `MACH_RCV_*`) which are kept distinct so log lines stay readable.

use mach2::kern_return::{
    KERN_FAILURE, KERN_INVALID_ARGUMENT, KERN_INVALID_RIGHT, KERN_NO_SPACE, KERN_PROTECTION_FAILURE, KERN_SUCCESS,
};
use thiserror::Error;

/// Mach kernel API error
///
/// Common values seen while arming or tearing down an exception monitor:
///
/// - `KERN_INVALID_ARGUMENT` (4): bad mask, behavior or flavor
/// - `KERN_FAILURE` (5): generic failure
/// - `KERN_NO_SPACE` (3): the IPC space has no room for another port name
/// - `KERN_INVALID_RIGHT` (17): the port right was already released
///
/// ## References
///
/// - [kern_return_t documentation](https://developer.apple.com/documentation/kernel/kern_return_t)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachError
{
    /// `KERN_INVALID_ARGUMENT`
    #[error("KERN_INVALID_ARGUMENT: Invalid argument to Mach call")]
    InvalidArgument,

    /// `KERN_FAILURE`
    #[error("KERN_FAILURE: Mach call failed")]
    Failure,

    /// `KERN_NO_SPACE`
    ///
    /// The task's IPC space is full. Usually means ports are being leaked.
    #[error("KERN_NO_SPACE: No room for another port name")]
    NoSpace,

    /// `KERN_INVALID_RIGHT`
    ///
    /// The named port right does not exist (already deallocated).
    #[error("KERN_INVALID_RIGHT: Port right is not valid")]
    InvalidRight,

    /// `KERN_PROTECTION_FAILURE`
    #[error("KERN_PROTECTION_FAILURE: Permission denied")]
    ProtectionFailure,

    /// A `mach_msg()` send or receive failure (`MACH_SEND_*` / `MACH_RCV_*`)
    #[error("mach_msg failed: 0x{0:08x}")]
    Message(i32),

    /// Unknown Mach error code
    ///
    /// The integer value is preserved so you can look it up.
    #[error("Unknown Mach error: {0}")]
    Unknown(i32),
}

impl MachError
{
    /// Wrap a `mach_msg()` return code.
    pub fn message(code: libc::kern_return_t) -> Self
    {
        MachError::Message(code)
    }
}

/// Convert a `kern_return_t` to a `MachError`
///
/// This allows us to use `?` operator with Mach API calls:
///
/// ```rust,no_run
/// use dynadump_core::platform::macos::error::MachError;
///
/// let kr = mach2::kern_return::KERN_INVALID_ARGUMENT;
/// assert_eq!(MachError::from(kr), MachError::InvalidArgument);
/// ```
impl From<libc::kern_return_t> for MachError
{
    fn from(code: libc::kern_return_t) -> Self
    {
        match code {
            KERN_INVALID_ARGUMENT => MachError::InvalidArgument,
            KERN_FAILURE => MachError::Failure,
            KERN_NO_SPACE => MachError::NoSpace,
            KERN_INVALID_RIGHT => MachError::InvalidRight,
            KERN_PROTECTION_FAILURE => MachError::ProtectionFailure,
            _ => MachError::Unknown(code),
        }
    }
}

/// Turn a `kern_return_t` into a `Result` without logging.
///
/// Used on the exception path, where the faulting thread is suspended.
pub(crate) fn kern_result(kr: libc::kern_return_t) -> Result<(), MachError>
{
    if kr == KERN_SUCCESS {
        Ok(())
    } else {
        Err(MachError::from(kr))
    }
}

/// Turn a `kern_return_t` into a `Result`, naming the failed call.
pub(crate) fn check(kr: libc::kern_return_t, call: &'static str) -> Result<(), MachError>
{
    kern_result(kr).inspect_err(|err| tracing::debug!(call, code = kr, "Mach call failed: {err}"))
}
