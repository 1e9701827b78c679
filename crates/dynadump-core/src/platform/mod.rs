//! # Platform-Specific Implementations
//!
//! The exception monitor needs per-thread exception ports, which only
//! Darwin provides:
//!
//! - **macOS**: Mach exception ports (`thread_swap_exception_ports`, `mach_msg`)
//!   - See: [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - **Everything else**: a stand-in whose `install()` always fails, so the
//!   orchestrator reports a setup failure and never runs the loader
//!
//! Both expose the same `ExceptionMonitor` API.

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(not(target_os = "macos"))]
mod unsupported;

#[cfg(target_os = "macos")]
pub use macos::ExceptionMonitor;
#[cfg(not(target_os = "macos"))]
pub use unsupported::ExceptionMonitor;
