//! # RAII Guards for Mach Port Rights
//!
//! This module provides RAII guards that release Mach port rights when
//! dropped, so every exit path of `install()` and `uninstall()` gives back
//! what it took.
//!
//! ## Guards
//!
//! - **ExceptionPort**: A receive right plus one send right under the same
//!   name. Destroying the receive right wakes any thread blocked in
//!   `mach_msg()` on it with `MACH_RCV_PORT_DIED`.
//! - **ThreadPort**: The user reference returned by `mach_thread_self()`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dynadump_core::platform::macos::guards::ExceptionPort;
//!
//! let mut port = ExceptionPort::allocate()?;
//! // hand `port.name()` to thread_swap_exception_ports ...
//! port.destroy(); // or just let it drop
//! # Ok::<(), dynadump_core::platform::macos::error::MachError>(())
//! ```

use libc::{mach_port_t, thread_act_t};
use mach2::mach_port::{mach_port_allocate, mach_port_insert_right, mach_port_mod_refs};
use mach2::message::MACH_MSG_TYPE_MAKE_SEND;
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE};
use mach2::traps::mach_task_self;
use tracing::{debug, warn};

use crate::platform::macos::error::{check, MachError};
use crate::platform::macos::ffi;

/// RAII guard over the monitor's exception port.
///
/// Holds a receive right and a send right that share one name. Both are
/// released by [`ExceptionPort::destroy`] or on drop.
#[derive(Debug)]
pub struct ExceptionPort
{
    name: mach_port_t,
    has_send_right: bool,
}

impl ExceptionPort
{
    /// Allocate a fresh receive right and insert a send right for it.
    ///
    /// ## Errors
    ///
    /// - `NoSpace`: the IPC space is full (port leak elsewhere)
    /// - Any other failure of `mach_port_allocate` / `mach_port_insert_right`
    ///
    /// On error nothing stays allocated.
    pub fn allocate() -> Result<Self, MachError>
    {
        let task = unsafe { mach_task_self() };
        let mut name: mach_port_t = MACH_PORT_NULL;
        check(
            unsafe { mach_port_allocate(task, MACH_PORT_RIGHT_RECEIVE, &mut name) },
            "mach_port_allocate",
        )?;

        let mut port = Self {
            name,
            has_send_right: false,
        };
        check(
            unsafe { mach_port_insert_right(task, name, name, MACH_MSG_TYPE_MAKE_SEND) },
            "mach_port_insert_right",
        )?;
        port.has_send_right = true;

        debug!(port = name, "allocated exception port");
        Ok(port)
    }

    /// Port name (valid until [`ExceptionPort::destroy`]).
    pub fn name(&self) -> mach_port_t
    {
        self.name
    }

    /// Returns `true` until the rights have been released.
    pub fn is_live(&self) -> bool
    {
        self.name != MACH_PORT_NULL
    }

    /// Release both rights. Failures are logged. Calling it again is a no-op.
    pub fn destroy(&mut self)
    {
        if !self.is_live() {
            return;
        }
        let task = unsafe { mach_task_self() };

        if let Err(err) = check(
            unsafe { mach_port_mod_refs(task, self.name, MACH_PORT_RIGHT_RECEIVE, -1) },
            "mach_port_mod_refs",
        ) {
            warn!(port = self.name, "failed to release exception port receive right: {err}");
        }
        // The send right is now a dead name; drop our reference to it.
        if self.has_send_right {
            if let Err(err) = check(unsafe { ffi::mach_port_deallocate(task, self.name) }, "mach_port_deallocate") {
                warn!(port = self.name, "failed to release exception port send right: {err}");
            }
            self.has_send_right = false;
        }

        debug!(port = self.name, "destroyed exception port");
        self.name = MACH_PORT_NULL;
    }
}

impl Drop for ExceptionPort
{
    fn drop(&mut self)
    {
        self.destroy();
    }
}

/// RAII guard over the calling thread's own port name.
///
/// `mach_thread_self()` adds a user reference every time it is called;
/// this guard gives it back on drop.
#[derive(Debug)]
pub struct ThreadPort
{
    name: thread_act_t,
}

impl ThreadPort
{
    /// Port for the calling thread.
    pub fn current() -> Self
    {
        Self {
            name: unsafe { ffi::mach_thread_self() },
        }
    }

    pub fn name(&self) -> thread_act_t
    {
        self.name
    }
}

impl Drop for ThreadPort
{
    fn drop(&mut self)
    {
        if self.name != MACH_PORT_NULL {
            // Best effort release - ignore errors
            unsafe {
                let _ = ffi::mach_port_deallocate(mach_task_self(), self.name);
            }
        }
    }
}

/// Release the port rights an exception request carried into our space.
pub(crate) fn release_message_rights(rights: &[mach_port_t])
{
    let task = unsafe { mach_task_self() };
    for &name in rights {
        if name == MACH_PORT_NULL {
            continue;
        }
        if let Err(err) = check(unsafe { ffi::mach_port_deallocate(task, name) }, "mach_port_deallocate") {
            debug!(port = name, "failed to release message right: {err}");
        }
    }
}
