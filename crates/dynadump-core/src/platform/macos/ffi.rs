//! # macOS Mach API FFI Declarations
//!
//! This module contains the `extern "C"` declarations the exception monitor
//! and the image helpers need that are not provided by the `mach2` crate,
//! together with the wire layout of the exception request message.
//!
//! ## Safety Notes
//!
//! All functions in this module are `unsafe` because they:
//! - Take raw port names and raw buffers
//! - Act on thread state of threads that may be suspended mid-instruction
//!
//! They are wrapped in safe abstractions in [`super::guards`] and
//! [`super::exception`].
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - XNU `osfmk/mach/mach_exc.defs` for the exception message layout

// Allow doc comments in extern blocks - they're useful for developers even if rustdoc doesn't generate docs
#![allow(unused_doc_comments)]

use libc::{c_char, c_int, c_void, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t};
use mach2::message::{mach_msg_body_t, mach_msg_header_t, mach_msg_port_descriptor_t};
use mach2::ndr::NDR_record_t;

/// `exception_mask_t`
pub type ExceptionMask = u32;
/// `exception_behavior_t`
pub type ExceptionBehavior = c_int;
/// `thread_state_flavor_t`
pub type ThreadStateFlavor = c_int;

/// Layout of a `mach_exception_raise` request (`msgh_id` 2405).
///
/// Requested with `EXCEPTION_DEFAULT | MACH_EXCEPTION_CODES`, so the message
/// carries the thread and task ports and two 64-bit codes but no thread
/// state. MIG packs the structure to 4 bytes, which leaves `code` unaligned:
/// always copy fields out by value.
#[repr(C, packed(4))]
#[derive(Clone, Copy)]
pub struct MachExceptionRequest
{
    pub head: mach_msg_header_t,
    pub body: mach_msg_body_t,
    pub thread: mach_msg_port_descriptor_t,
    pub task: mach_msg_port_descriptor_t,
    pub ndr: NDR_record_t,
    pub exception: c_int,
    pub code_count: mach_msg_type_number_t,
    pub code: [i64; 2],
}

// Thread State Functions
//
// These functions read and write thread state (registers) from threads.
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Read thread state (registers) from a thread
    ///
    /// ## Parameters
    ///
    /// - `target_act`: Thread port (from the exception message)
    /// - `flavor`: `ARM_THREAD_STATE64`, `ARM_DEBUG_STATE64`, `X86_THREAD_STATE64`
    /// - `old_state`: Output buffer for register values
    /// - `old_state_count`: Input/output - size of buffer / actual size used
    ///
    /// See: [thread_get_state(3) man page](https://developer.apple.com/documentation/kernel/1418576-thread_get_state/)
    pub fn thread_get_state(
        target_act: thread_act_t,
        flavor: c_int,
        old_state: *mut natural_t,
        old_state_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Write thread state (registers) to a thread
    ///
    /// The thread must be stopped (parked in an exception) for the change to
    /// take effect predictably.
    ///
    /// See: [thread_set_state(3) man page](https://developer.apple.com/documentation/kernel/1418827-thread_set_state/)
    pub fn thread_set_state(
        target_act: thread_act_t,
        flavor: c_int,
        new_state: *const natural_t,
        new_state_count: mach_msg_type_number_t,
    ) -> kern_return_t;
}

// Exception Port Functions
//
// Per-thread exception port registration. Task-level ports would capture
// faults on every thread, which the monitor must never do.
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Atomically install a new exception port for `thread` and return the
    /// handlers it replaced.
    ///
    /// ## Parameters
    ///
    /// - `exception_mask`: Which exception types to redirect
    /// - `new_port`: Port that receives the exception messages (needs a send right)
    /// - `behavior`: `EXCEPTION_DEFAULT | MACH_EXCEPTION_CODES`
    /// - `new_flavor`: Thread state flavor (validated even for `EXCEPTION_DEFAULT`)
    /// - `masks`, `old_handlers`, `old_behaviors`, `old_flavors`: Output arrays
    ///   of at least `EXC_TYPES_COUNT` entries
    /// - `masks_count`: Input capacity / output number of entries used
    ///
    /// See: [thread_swap_exception_ports](https://developer.apple.com/documentation/kernel/1402139-thread_swap_exception_ports/)
    pub fn thread_swap_exception_ports(
        thread: thread_act_t,
        exception_mask: ExceptionMask,
        new_port: mach_port_t,
        behavior: ExceptionBehavior,
        new_flavor: ThreadStateFlavor,
        masks: *mut ExceptionMask,
        masks_count: *mut mach_msg_type_number_t,
        old_handlers: *mut mach_port_t,
        old_behaviors: *mut ExceptionBehavior,
        old_flavors: *mut ThreadStateFlavor,
    ) -> kern_return_t;

    /// Install one exception handler for the exception types in `exception_mask`.
    ///
    /// Used to put back each handler saved by `thread_swap_exception_ports`.
    pub fn thread_set_exception_ports(
        thread: thread_act_t,
        exception_mask: ExceptionMask,
        new_port: mach_port_t,
        behavior: ExceptionBehavior,
        new_flavor: ThreadStateFlavor,
    ) -> kern_return_t;

    /// Port name for the calling thread. Each call adds a user reference
    /// that must be released with `mach_port_deallocate`.
    pub fn mach_thread_self() -> thread_act_t;

    /// Release one user reference on `name`.
    ///
    /// See: [mach_port_deallocate(3) man page](https://developer.apple.com/documentation/kernel/1578777-mach_port_deallocate/)
    pub fn mach_port_deallocate(target_task: mach_port_t, name: mach_port_t) -> kern_return_t;
}

// pthread Stack Introspection
//
// Stack bounds of the faulting thread, used to range-check frame pointers.
extern "C" {
    /// The pthread behind a Mach thread port, or null if there is none.
    pub fn pthread_from_mach_thread_np(port: mach_port_t) -> libc::pthread_t;

    /// Highest address of the thread's stack (stacks grow down from here).
    pub fn pthread_get_stackaddr_np(thread: libc::pthread_t) -> *mut c_void;

    /// Size in bytes of the thread's stack.
    pub fn pthread_get_stacksize_np(thread: libc::pthread_t) -> libc::size_t;
}

// dyld Image Enumeration
//
// Always present in libdyld. The optional, version-dependent dyld entry
// points are resolved at runtime by `crate::image::DyldCapabilities`.
extern "C" {
    /// Number of images currently loaded in the process.
    pub fn _dyld_image_count() -> u32;

    /// Install name of image `index`, or null if out of range.
    pub fn _dyld_get_image_name(index: u32) -> *const c_char;

    /// Load address of image `index`'s Mach-O header, or null if out of range.
    pub fn _dyld_get_image_header(index: u32) -> *const c_void;

    /// ASLR slide applied to image `index`.
    pub fn _dyld_get_image_vmaddr_slide(index: u32) -> libc::intptr_t;
}

// Blocks Runtime
//
// Class of a block literal living on the stack. dyld SPIs that enumerate
// the shared cache take a block, see `super::block`.
extern "C" {
    pub static _NSConcreteStackBlock: [*const c_void; 32];
}
