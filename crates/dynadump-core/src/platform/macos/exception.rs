//! # Mach Exception Monitor
//!
//! Catches bad-access and debug-trap exceptions raised by one thread while
//! it runs untrusted code, and either steps the thread past the faulting
//! instruction or lets the fault take the process down after logging a
//! backtrace.
//!
//! ## Mach Exception Ports
//!
//! On macOS, exceptions are delivered via Mach ports. The monitor allocates
//! a port, starts a receiver thread blocked in `mach_msg()` on it, and then
//! swaps the calling thread's exception ports so that its
//! `EXC_BAD_ACCESS`/`EXC_BREAKPOINT` exceptions arrive there. The kernel
//! keeps the faulting thread suspended until the receiver replies:
//!
//! - `KERN_SUCCESS`: resume the thread with whatever state we set
//! - `KERN_FAILURE`: try the next handler, ending in the default action
//!   (signal delivery and, for a fault, process termination)
//!
//! ## References
//!
//! - [thread_swap_exception_ports](https://developer.apple.com/documentation/kernel/1402139-thread_swap_exception_ports/)
//! - [mach_msg(3) man page](https://developer.apple.com/documentation/kernel/1402149-mach_msg/)

use std::mem;
use std::ops::ControlFlow;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use libc::{kern_return_t, mach_msg_type_number_t, mach_port_t, thread_act_t};
use mach2::exc::__Reply__exception_raise_t;
use mach2::kern_return::{KERN_FAILURE, KERN_SUCCESS};
use mach2::message::{
    mach_msg, mach_msg_header_t, mach_msg_size_t, MACH_MSGH_BITS, MACH_MSG_SUCCESS, MACH_MSG_TIMEOUT_NONE,
    MACH_MSG_TYPE_MAKE_SEND, MACH_MSG_TYPE_MOVE_SEND_ONCE, MACH_RCV_INVALID_NAME, MACH_RCV_MSG, MACH_RCV_PORT_DIED,
    MACH_RCV_TOO_LARGE, MACH_SEND_MSG, MACH_SEND_TIMEOUT,
};
use mach2::ndr::NDR_record;
use mach2::port::MACH_PORT_NULL;
use tracing::{debug, error, info, warn};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::monitor::{judge, FatalCause, LiveMonitor, MonitorState, SharedState, Verdict};
use crate::platform::macos::constants;
use crate::platform::macos::error::{check, kern_result, MachError};
use crate::platform::macos::ffi::{self, MachExceptionRequest};
use crate::platform::macos::guards::{release_message_rights, ExceptionPort, ThreadPort};
use crate::platform::macos::thread_state;
use crate::report::{format_fatal_report, StackWriter, FATAL_REPORT_CAPACITY};
use crate::stepover::StepoverRegistry;
use crate::types::{Address, ExceptionContext, FaultClass, FaultRecord};
use crate::unwind::{Backtrace, LocalStack, StackBounds};

/// Name of the receiver thread.
pub const RECEIVER_THREAD_NAME: &str = "dynadump-exc";

/// Stepped-over faults kept per probe. Space is reserved up front so the
/// receiver never allocates while the faulting thread is suspended.
const MAX_RECORDED_FAULTS: usize = 256;

/// State shared by the monitor and its receiver thread.
#[derive(Debug)]
struct Shared
{
    state: SharedState,
    step_pending: AtomicBool,
    faults: Mutex<Vec<FaultRecord>>,
    dropped_faults: AtomicUsize,
}

impl Shared
{
    fn new() -> Self
    {
        Self {
            state: SharedState::default(),
            step_pending: AtomicBool::new(false),
            faults: Mutex::new(Vec::with_capacity(MAX_RECORDED_FAULTS)),
            dropped_faults: AtomicUsize::new(0),
        }
    }

    fn reset(&self)
    {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.dropped_faults.store(0, Ordering::Relaxed);
        self.step_pending.store(false, Ordering::Relaxed);
        self.state.set(MonitorState::Idle);
    }

    fn record(&self, record: FaultRecord)
    {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if faults.len() < faults.capacity() {
            faults.push(record);
        } else {
            self.dropped_faults.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Exception handlers replaced by `thread_swap_exception_ports`.
#[derive(Debug, Clone, Copy)]
struct SavedHandlers
{
    count: mach_msg_type_number_t,
    masks: [ffi::ExceptionMask; constants::EXC_TYPES_COUNT],
    handlers: [mach_port_t; constants::EXC_TYPES_COUNT],
    behaviors: [ffi::ExceptionBehavior; constants::EXC_TYPES_COUNT],
    flavors: [ffi::ThreadStateFlavor; constants::EXC_TYPES_COUNT],
}

impl SavedHandlers
{
    /// Point `thread`'s monitored exceptions at `port`, saving what was there.
    fn swap(thread: thread_act_t, port: mach_port_t) -> std::result::Result<Self, MachError>
    {
        let mut saved = Self {
            count: constants::EXC_TYPES_COUNT as mach_msg_type_number_t,
            masks: [0; constants::EXC_TYPES_COUNT],
            handlers: [MACH_PORT_NULL; constants::EXC_TYPES_COUNT],
            behaviors: [0; constants::EXC_TYPES_COUNT],
            flavors: [0; constants::EXC_TYPES_COUNT],
        };
        let kr = unsafe {
            ffi::thread_swap_exception_ports(
                thread,
                constants::MONITORED_EXCEPTIONS,
                port,
                constants::EXCEPTION_DEFAULT | constants::MACH_EXCEPTION_CODES,
                constants::NATIVE_THREAD_STATE_FLAVOR,
                saved.masks.as_mut_ptr(),
                &mut saved.count,
                saved.handlers.as_mut_ptr(),
                saved.behaviors.as_mut_ptr(),
                saved.flavors.as_mut_ptr(),
            )
        };
        check(kr, "thread_swap_exception_ports")?;
        saved.count = saved.count.min(constants::EXC_TYPES_COUNT as mach_msg_type_number_t);
        Ok(saved)
    }

    fn entries(&self) -> impl Iterator<Item = usize>
    {
        0..self.count as usize
    }

    /// Reinstall every saved handler on `thread`, then drop our references
    /// to the old handler ports.
    fn restore(&self, thread: thread_act_t) -> std::result::Result<(), MachError>
    {
        let mut result = Ok(());
        for i in self.entries() {
            let kr = unsafe {
                ffi::thread_set_exception_ports(
                    thread,
                    self.masks[i],
                    self.handlers[i],
                    self.behaviors[i],
                    self.flavors[i],
                )
            };
            if let Err(err) = check(kr, "thread_set_exception_ports") {
                result = Err(err);
            }
        }
        release_message_rights(&self.handlers[..self.count as usize]);
        result
    }
}

/// Clear the thread-level handlers for the monitored exceptions so the next
/// delivery falls through to the task and host handlers.
fn disarm_thread(thread: thread_act_t) -> std::result::Result<(), MachError>
{
    let kr = unsafe {
        ffi::thread_set_exception_ports(
            thread,
            constants::MONITORED_EXCEPTIONS,
            MACH_PORT_NULL,
            constants::EXCEPTION_DEFAULT | constants::MACH_EXCEPTION_CODES,
            constants::NATIVE_THREAD_STATE_FLAVOR,
        )
    };
    kern_result(kr)
}

/// Everything that exists only while the monitor is armed.
struct Armed
{
    port: ExceptionPort,
    thread: ThreadPort,
    saved: SavedHandlers,
    receiver: JoinHandle<()>,
    exited: mpsc::Receiver<()>,
}

/// Exception monitor for the thread that calls [`ExceptionMonitor::install`].
///
/// ```rust,no_run
/// use dynadump_core::config::ProbeConfig;
/// use dynadump_core::platform::ExceptionMonitor;
/// use dynadump_core::stepover::StepoverRegistry;
///
/// let mut monitor = ExceptionMonitor::new(StepoverRegistry::global(), ProbeConfig::default());
/// monitor.install()?;
/// // ... run code that may fault at registered addresses ...
/// monitor.uninstall();
/// # Ok::<(), dynadump_core::error::ProbeError>(())
/// ```
pub struct ExceptionMonitor
{
    registry: Arc<StepoverRegistry>,
    config: ProbeConfig,
    shared: Arc<Shared>,
    armed: Option<Armed>,
}

impl ExceptionMonitor
{
    pub fn new(registry: Arc<StepoverRegistry>, config: ProbeConfig) -> Self
    {
        Self {
            registry,
            config,
            shared: Arc::new(Shared::new()),
            armed: None,
        }
    }

    /// Arm the monitor for the calling thread.
    ///
    /// The receiver thread is running and has reported ready before the
    /// exception ports are swapped. Installing an armed monitor again does
    /// nothing.
    ///
    /// ## Errors
    ///
    /// `ProbeError::Mach` if the kernel refuses the port or the handler swap,
    /// `ProbeError::Setup` if the receiver thread cannot be started. Everything
    /// acquired up to that point has been released when the error is returned.
    pub fn install(&mut self) -> Result<()>
    {
        if self.armed.is_some() {
            debug!("exception monitor already armed");
            return Ok(());
        }
        self.shared.reset();

        let port = ExceptionPort::allocate()?;
        let thread = ThreadPort::current();

        let (ready_tx, ready_rx) = mpsc::channel();
        let (exited_tx, exited_rx) = mpsc::channel();
        let receiver = Receiver {
            port: port.name(),
            monitored: thread.name(),
            registry: Arc::clone(&self.registry),
            shared: Arc::clone(&self.shared),
            config: self.config,
            _live: LiveMonitor::acquire(),
        };
        let handle = thread::Builder::new()
            .name(RECEIVER_THREAD_NAME.to_string())
            .spawn(move || receiver.run(&ready_tx, &exited_tx))
            .map_err(|err| setup_error("spawn receiver thread", err))?;

        // From here on a failure has to wake the receiver by destroying the
        // port before the thread can be joined.
        if ready_rx.recv_timeout(self.config.teardown_timeout).is_err() {
            abandon_receiver(port, handle, &exited_rx, self.config);
            return Err(ProbeError::Setup("receiver thread did not become ready".to_string()));
        }

        let saved = match SavedHandlers::swap(thread.name(), port.name()) {
            Ok(saved) => saved,
            Err(err) => {
                abandon_receiver(port, handle, &exited_rx, self.config);
                return Err(err.into());
            }
        };

        self.shared.state.set(MonitorState::Armed);
        debug!(
            port = port.name(),
            thread = thread.name(),
            saved_handlers = saved.count,
            "exception monitor armed"
        );
        self.armed = Some(Armed {
            port,
            thread,
            saved,
            receiver: handle,
            exited: exited_rx,
        });
        Ok(())
    }

    /// Disarm the monitor and release every resource it holds.
    ///
    /// Restores the saved exception handlers, asks the receiver to exit,
    /// waits at most `teardown_timeout` for it, and destroys the port either
    /// way. Problems are logged, never returned. Calling it on a monitor that
    /// is not armed does nothing.
    pub fn uninstall(&mut self)
    {
        let Some(mut armed) = self.armed.take() else {
            return;
        };

        if let Err(err) = armed.saved.restore(armed.thread.name()) {
            warn!("failed to restore previous exception handlers: {err}");
        }

        if let Err(err) = send_shutdown(armed.port.name()) {
            warn!("failed to send shutdown message to exception receiver: {err}");
        }
        wait_for_receiver(armed.receiver, &armed.exited, self.config);
        armed.port.destroy();

        let last_state = self.shared.state.get();
        self.shared.state.set(MonitorState::Idle);
        debug!(%last_state, "exception monitor uninstalled");
    }

    /// Returns `true` while exception ports are installed.
    pub fn is_armed(&self) -> bool
    {
        self.armed.is_some()
    }

    pub fn state(&self) -> MonitorState
    {
        self.shared.state.get()
    }

    /// Faults stepped over since the last `install()`, oldest first.
    pub fn stepped_over(&self) -> Vec<FaultRecord>
    {
        let dropped = self.shared.dropped_faults.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!(dropped, "stepped-over fault records exceeded capacity");
        }
        self.shared.faults.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn config(&self) -> &ProbeConfig
    {
        &self.config
    }
}

impl Drop for ExceptionMonitor
{
    fn drop(&mut self)
    {
        self.uninstall();
    }
}

fn setup_error(step: &str, err: impl std::fmt::Display) -> ProbeError
{
    ProbeError::Setup(format!("{step}: {err}"))
}

/// Tear down a receiver that was started but never armed.
fn abandon_receiver(mut port: ExceptionPort, handle: JoinHandle<()>, exited: &mpsc::Receiver<()>, config: ProbeConfig)
{
    port.destroy();
    wait_for_receiver(handle, exited, config);
}

/// Join the receiver if it reports its exit within the timeout.
fn wait_for_receiver(handle: JoinHandle<()>, exited: &mpsc::Receiver<()>, config: ProbeConfig)
{
    match exited.recv_timeout(config.teardown_timeout) {
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
            if handle.join().is_err() {
                warn!("exception receiver thread panicked");
            }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(
                timeout_ms = config.teardown_timeout.as_millis(),
                "exception receiver did not acknowledge shutdown, detaching it"
            );
        }
    }
}

/// Post the control message that makes the receiver leave its loop.
fn send_shutdown(port: mach_port_t) -> std::result::Result<(), MachError>
{
    let mut header = mach_msg_header_t {
        msgh_bits: MACH_MSGH_BITS(MACH_MSG_TYPE_MAKE_SEND, 0),
        msgh_size: mem::size_of::<mach_msg_header_t>() as mach_msg_size_t,
        msgh_remote_port: port,
        msgh_local_port: MACH_PORT_NULL,
        msgh_voucher_port: MACH_PORT_NULL,
        msgh_id: constants::SHUTDOWN_MESSAGE_ID,
    };
    let kr = unsafe {
        mach_msg(
            &mut header,
            MACH_SEND_MSG | MACH_SEND_TIMEOUT,
            header.msgh_size,
            0,
            MACH_PORT_NULL,
            constants::SHUTDOWN_SEND_TIMEOUT_MS,
            MACH_PORT_NULL,
        )
    };
    if kr != MACH_MSG_SUCCESS {
        return Err(MachError::message(kr));
    }
    Ok(())
}

/// Send a reply to a Mach exception message.
///
/// `ret_code` is `KERN_SUCCESS` to resume the thread or `KERN_FAILURE` to
/// pass the exception on.
fn send_exception_reply(request: &mach_msg_header_t, ret_code: kern_return_t) -> std::result::Result<(), MachError>
{
    let mut reply = __Reply__exception_raise_t {
        Head: mach_msg_header_t {
            msgh_bits: MACH_MSGH_BITS(MACH_MSG_TYPE_MOVE_SEND_ONCE, 0),
            msgh_size: mem::size_of::<__Reply__exception_raise_t>() as mach_msg_size_t,
            msgh_remote_port: request.msgh_remote_port,
            msgh_local_port: MACH_PORT_NULL,
            msgh_voucher_port: MACH_PORT_NULL,
            msgh_id: request.msgh_id + constants::MIG_REPLY_OFFSET,
        },
        NDR: unsafe { NDR_record },
        RetCode: ret_code,
    };

    let kr = unsafe {
        mach_msg(
            &mut reply.Head,
            MACH_SEND_MSG,
            reply.Head.msgh_size,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };
    if kr != MACH_MSG_SUCCESS {
        return Err(MachError::message(kr));
    }
    Ok(())
}

/// Stack of the thread behind `thread`, from its pthread.
fn stack_bounds(thread: thread_act_t) -> Option<StackBounds>
{
    unsafe {
        let pthread = ffi::pthread_from_mach_thread_np(thread);
        if pthread == 0 as libc::pthread_t {
            return None;
        }
        let base = ffi::pthread_get_stackaddr_np(pthread) as u64;
        let size = ffi::pthread_get_stacksize_np(pthread) as u64;
        if base == 0 || size == 0 || size > base {
            return None;
        }
        Some(StackBounds::from_base_and_size(Address::new(base), size))
    }
}

#[repr(C, align(8))]
struct ReceiveBuffer([u8; constants::RECEIVE_BUFFER_SIZE]);

impl ReceiveBuffer
{
    fn header_ptr(&mut self) -> *mut mach_msg_header_t
    {
        self.0.as_mut_ptr().cast()
    }

    fn header(&self) -> mach_msg_header_t
    {
        unsafe { ptr::read(self.0.as_ptr().cast()) }
    }

    fn exception_request(&self) -> Option<MachExceptionRequest>
    {
        let header = self.header();
        if (header.msgh_size as usize) < mem::size_of::<MachExceptionRequest>() {
            return None;
        }
        Some(unsafe { ptr::read_unaligned(self.0.as_ptr().cast()) })
    }
}

/// The receiver thread's half of the monitor.
struct Receiver
{
    port: mach_port_t,
    monitored: thread_act_t,
    registry: Arc<StepoverRegistry>,
    shared: Arc<Shared>,
    config: ProbeConfig,
    _live: LiveMonitor,
}

impl Receiver
{
    fn run(self, ready: &mpsc::Sender<()>, exited: &mpsc::Sender<()>)
    {
        // Registers this thread with the registry's epoch collector so the
        // first lookup on the fault path does not allocate.
        let _ = self.registry.contains(Address::ZERO);
        let _ = ready.send(());

        let mut buffer = ReceiveBuffer([0; constants::RECEIVE_BUFFER_SIZE]);
        while self.receive_one(&mut buffer).is_continue() {}

        debug!("exception receiver exiting");
        // Release the live count before the monitor can observe the exit.
        drop(self);
        let _ = exited.send(());
    }

    fn receive_one(&self, buffer: &mut ReceiveBuffer) -> ControlFlow<()>
    {
        let kr = unsafe {
            mach_msg(
                buffer.header_ptr(),
                MACH_RCV_MSG,
                0,
                constants::RECEIVE_BUFFER_SIZE as mach_msg_size_t,
                self.port,
                MACH_MSG_TIMEOUT_NONE,
                MACH_PORT_NULL,
            )
        };

        match kr {
            MACH_MSG_SUCCESS => {}
            MACH_RCV_PORT_DIED | MACH_RCV_INVALID_NAME => {
                debug!("exception port closed");
                return ControlFlow::Break(());
            }
            MACH_RCV_TOO_LARGE => {
                warn!("discarded oversized message on exception port");
                return ControlFlow::Continue(());
            }
            other => {
                warn!("mach_msg receive failed: {}", MachError::message(other));
                return ControlFlow::Break(());
            }
        }

        let header = buffer.header();
        match header.msgh_id {
            constants::SHUTDOWN_MESSAGE_ID => {
                debug!("exception receiver shutdown requested");
                ControlFlow::Break(())
            }
            constants::MACH_EXCEPTION_RAISE_ID => match buffer.exception_request() {
                Some(request) => self.handle(&request),
                None => {
                    warn!(size = header.msgh_size, "truncated exception message");
                    ControlFlow::Continue(())
                }
            },
            id => {
                warn!(id, "unexpected message on exception port");
                ControlFlow::Continue(())
            }
        }
    }

    /// Answer one exception request. Breaks once the monitor is fatal.
    ///
    /// Nothing between reading the request and sending the reply logs or
    /// allocates: the suspended thread may own the allocator or the log
    /// writer. What happened is logged after the reply.
    fn handle(&self, request: &MachExceptionRequest) -> ControlFlow<()>
    {
        let head = request.head;
        let thread = request.thread.name;
        let task = request.task.name;

        let registers = thread_state::frame_registers(thread);
        let frame = registers.unwrap_or_default();
        let ctx = ExceptionContext {
            thread,
            task,
            class: FaultClass::from_raw(request.exception),
            codes: request.code,
            pc: frame.pc,
            fp: frame.fp,
            lr: frame.lr,
        };

        let verdict = judge(
            &ctx,
            self.monitored,
            &self.registry,
            self.shared.step_pending.load(Ordering::Acquire),
            constants::FIXED_INSTRUCTION_WIDTH,
        );
        if verdict != Verdict::Foreign {
            self.shared.state.advance(MonitorState::Handling);
        }

        let outcome = match verdict {
            Verdict::Foreign => Outcome::PassedOn,
            Verdict::StepOver { record, width } => self.step_over(&ctx, record, width),
            Verdict::ProgressConfirmed { pc } => {
                let cleared = thread_state::set_single_step(thread, false);
                self.shared.step_pending.store(false, Ordering::Release);
                Outcome::ProgressConfirmed { pc, cleared }
            }
            Verdict::Fatal { record, cause } => self.report_fatal(&ctx, record, cause, None),
        };

        let ret_code = outcome.ret_code();
        if verdict.resumes() && ret_code == KERN_SUCCESS {
            self.shared.state.advance(MonitorState::Armed);
        }

        let reply = send_exception_reply(&head, ret_code);
        release_message_rights(&[thread, task]);

        if let Err(err) = registers {
            warn!(thread, "failed to read faulting thread state: {err}");
        }
        if self.config.verbose {
            info!(
                thread,
                class = %ctx.class,
                code0 = ctx.codes[0],
                address = %ctx.fault_address(),
                pc = %ctx.pc,
                "exception received"
            );
        }
        if let Err(err) = reply {
            error!("failed to send exception reply: {err}");
        }
        outcome.log(thread);

        if self.shared.state.get() == MonitorState::Fatal {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn step_over(&self, ctx: &ExceptionContext, record: FaultRecord, width: u64) -> Outcome
    {
        let resume_pc = match thread_state::advance_pc(ctx.thread, width) {
            Ok(pc) => pc,
            Err(err) => return self.report_fatal(ctx, record, FatalCause::ResumeFailed, Some(err)),
        };

        self.shared.record(record);

        let single_step = self.config.verify_progress.then(|| {
            let armed = thread_state::set_single_step(ctx.thread, true);
            if armed.is_ok() {
                self.shared.step_pending.store(true, Ordering::Release);
            }
            armed
        });
        Outcome::SteppedOver {
            record,
            resume_pc,
            single_step,
        }
    }

    /// Mark the monitor fatal and write the fault with a backtrace straight
    /// to stderr.
    ///
    /// Symbolication is left to the reader: resolving names here would
    /// need the dyld lock, which the faulting thread may hold.
    fn report_fatal(
        &self,
        ctx: &ExceptionContext,
        record: FaultRecord,
        cause: FatalCause,
        resume_error: Option<MachError>,
    ) -> Outcome
    {
        self.shared.state.set(MonitorState::Fatal);

        let bounds = stack_bounds(ctx.thread);
        let backtrace = bounds.map(|bounds| {
            Backtrace::capture(
                &LocalStack::new(bounds),
                bounds,
                self.config.canonicalizer,
                ctx.pc,
                ctx.fp,
                self.config.max_backtrace_depth,
            )
        });
        let mut report = StackWriter::<FATAL_REPORT_CAPACITY>::new();
        format_fatal_report(&mut report, &record, cause, ctx.fp, ctx.lr, backtrace.as_ref());
        write_stderr(report.as_bytes());

        // The receiver stops after this, so the retried instruction must not
        // be routed back to our port.
        let disarmed = disarm_thread(ctx.thread);
        Outcome::Fatal {
            record,
            cause,
            resume_error,
            disarmed,
        }
    }
}

/// What the receiver did with one request.
#[derive(Debug)]
enum Outcome
{
    PassedOn,
    SteppedOver
    {
        record: FaultRecord,
        resume_pc: Address,
        /// `None` unless progress verification is on.
        single_step: Option<std::result::Result<(), MachError>>,
    },
    ProgressConfirmed
    {
        pc: Address,
        cleared: std::result::Result<(), MachError>,
    },
    Fatal
    {
        record: FaultRecord,
        cause: FatalCause,
        resume_error: Option<MachError>,
        disarmed: std::result::Result<(), MachError>,
    },
}

impl Outcome
{
    fn ret_code(&self) -> kern_return_t
    {
        match self {
            Outcome::SteppedOver { .. } | Outcome::ProgressConfirmed { .. } => KERN_SUCCESS,
            Outcome::PassedOn | Outcome::Fatal { .. } => KERN_FAILURE,
        }
    }

    fn log(&self, thread: thread_act_t)
    {
        match self {
            Outcome::PassedOn => debug!(thread, "exception from unmonitored thread passed on"),
            Outcome::SteppedOver {
                record,
                resume_pc,
                single_step,
            } => {
                info!(%record, %resume_pc, "stepped over fault");
                if let Some(Err(err)) = single_step {
                    warn!("failed to arm progress single-step: {err}");
                }
            }
            Outcome::ProgressConfirmed { pc, cleared } => {
                if let Err(err) = cleared {
                    warn!("failed to clear single-step: {err}");
                }
                info!(%pc, "forward progress confirmed after stepover");
            }
            Outcome::Fatal {
                record,
                cause,
                resume_error,
                disarmed,
            } => {
                if let Some(err) = resume_error {
                    error!(%record, "failed to advance pc past fault: {err}");
                }
                if *cause == FatalCause::StepoverUnsupported {
                    warn!("stepover is not supported on this architecture (variable-width instructions)");
                }
                if let Err(err) = disarmed {
                    warn!(thread, "failed to clear exception handlers of faulting thread: {err}");
                }
                error!(%record, %cause, "unrecoverable fault, backtrace written to stderr");
            }
        }
    }
}

/// Write `bytes` to fd 2 without going through Rust's stderr lock.
fn write_stderr(mut bytes: &[u8])
{
    while !bytes.is_empty() {
        let written = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        match usize::try_from(written) {
            Ok(0) | Err(_) => return,
            Ok(n) => bytes = &bytes[n.min(bytes.len())..],
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::monitor::live_monitor_count;

    fn monitor() -> ExceptionMonitor
    {
        ExceptionMonitor::new(
            Arc::new(StepoverRegistry::new(Canonicalizer::native())),
            ProbeConfig::default(),
        )
    }

    #[test]
    fn test_install_uninstall_cycle()
    {
        let mut monitor = monitor();
        monitor.install().unwrap();
        assert!(monitor.is_armed());
        assert_eq!(monitor.state(), MonitorState::Armed);
        assert!(live_monitor_count() >= 1);

        monitor.uninstall();
        assert!(!monitor.is_armed());
        assert_eq!(monitor.state(), MonitorState::Idle);
        monitor.uninstall();
    }

    #[test]
    fn test_install_twice_is_noop()
    {
        let mut monitor = monitor();
        monitor.install().unwrap();
        monitor.install().unwrap();
        assert!(monitor.is_armed());
    }

    #[test]
    fn test_stack_bounds_of_current_thread()
    {
        let thread = ThreadPort::current();
        let bounds = stack_bounds(thread.name()).unwrap();
        let local = 0u64;
        let here = Address::from_ptr(std::ptr::addr_of!(local));
        assert!(here >= bounds.low && here < bounds.high);
    }
}
