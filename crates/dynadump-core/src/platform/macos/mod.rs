//! # macOS Exception Monitoring
//!
//! Mach-based implementation of the exception monitor.
//!
//! macOS delivers hardware exceptions as Mach messages before they ever
//! become signals. A thread's exception ports decide who hears about them:
//!
//! - **Exception port**: receive right we own, registered for one thread
//! - **Receiver thread**: blocks in `mach_msg()` on that port
//! - **Reply**: resumes the faulting thread or passes the exception on
//!
//! ## Dependencies
//!
//! We use a hybrid approach:
//! - **mach2 crate**: `mach_msg`, port allocation, message and reply layouts
//! - **libc crate**: Type definitions (`mach_port_t`, `thread_act_t`, etc.)
//! - **extern "C"**: Functions not in mach2 (`thread_swap_exception_ports`,
//!   `thread_get_state`, the `pthread_*_np` stack queries, `_dyld_*`)
//! - **block**: stack block literals for the dyld SPIs that take a callback
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)

pub(crate) mod block;
pub mod constants;
pub mod error;
pub mod exception;
pub mod ffi;
pub mod guards;
pub mod thread_state;

pub use exception::ExceptionMonitor;
