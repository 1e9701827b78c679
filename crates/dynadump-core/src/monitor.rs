//! # Exception Monitor State
//!
//! The platform-independent half of the exception monitor: its lifecycle
//! states, the per-message decision ("step over, confirm, pass on or die")
//! and live-monitor accounting.
//!
//! The Mach plumbing in `platform::macos::exception` builds an
//! [`ExceptionContext`] for each message, asks [`judge`] what to do and
//! carries the [`Verdict`] out. Keeping the decision here lets it be tested
//! on any host.
//!
//! ```text
//!   Idle --install--> Armed --message--> Handling --+--> Armed
//!                       ^                            |
//!                       +----------------------------+--> Fatal
//!   Armed | Fatal --uninstall--> Idle
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::stepover::StepoverRegistry;
use crate::types::{Address, ExceptionContext, FaultClass, FaultRecord};

static LIVE_MONITORS: AtomicUsize = AtomicUsize::new(0);

/// Number of monitors whose receiver thread is still running.
///
/// Goes back to zero once every receiver has exited. A receiver detached
/// after a teardown timeout keeps its count until it actually leaves.
pub fn live_monitor_count() -> usize
{
    LIVE_MONITORS.load(Ordering::SeqCst)
}

/// Token owned by a receiver thread. Dropping it releases the count.
#[derive(Debug)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) struct LiveMonitor(());

impl LiveMonitor
{
    #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
    pub(crate) fn acquire() -> Self
    {
        LIVE_MONITORS.fetch_add(1, Ordering::SeqCst);
        LiveMonitor(())
    }
}

impl Drop for LiveMonitor
{
    fn drop(&mut self)
    {
        LIVE_MONITORS.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lifecycle of one exception monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MonitorState
{
    /// Nothing installed.
    Idle = 0,
    /// Exception port installed, receiver waiting.
    Armed = 1,
    /// Receiver is processing a message for the monitored thread.
    Handling = 2,
    /// An unrecoverable fault was passed on; the process is going down.
    Fatal = 3,
}

impl MonitorState
{
    const fn from_u8(value: u8) -> Self
    {
        match value {
            1 => MonitorState::Armed,
            2 => MonitorState::Handling,
            3 => MonitorState::Fatal,
            _ => MonitorState::Idle,
        }
    }
}

impl fmt::Display for MonitorState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Armed => "armed",
            MonitorState::Handling => "handling",
            MonitorState::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// [`MonitorState`] shared between the installing thread and the receiver.
///
/// Atomic so the receiver never takes a lock while the monitored thread is
/// suspended.
#[derive(Debug)]
pub struct SharedState(AtomicU8);

impl SharedState
{
    pub fn new(state: MonitorState) -> Self
    {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> MonitorState
    {
        MonitorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: MonitorState)
    {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `next` unless the monitor is already [`MonitorState::Fatal`].
    ///
    /// Returns the state that is in effect afterwards.
    pub fn advance(&self, next: MonitorState) -> MonitorState
    {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current == MonitorState::Fatal as u8 {
                return MonitorState::Fatal;
            }
            match self
                .0
                .compare_exchange_weak(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SharedState
{
    fn default() -> Self
    {
        Self::new(MonitorState::Idle)
    }
}

/// Why a fault cannot be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCause
{
    /// Neither the faulting address nor the pc is a stepover address.
    Unregistered,
    /// The address is registered but the instruction width is not fixed on
    /// this architecture, so the pc cannot be advanced safely.
    StepoverUnsupported,
    /// Exception class the monitor does not handle.
    Unhandled,
    /// The fault was resumable but the thread state could not be updated.
    ResumeFailed,
}

impl fmt::Display for FatalCause
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            FatalCause::Unregistered => f.write_str("address not registered for stepover"),
            FatalCause::StepoverUnsupported => f.write_str("stepover unsupported on this architecture"),
            FatalCause::Unhandled => f.write_str("unhandled exception class"),
            FatalCause::ResumeFailed => f.write_str("failed to update thread state"),
        }
    }
}

/// What the receiver does with one exception message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict
{
    /// Not the monitored thread: answer `KERN_FAILURE` and change nothing,
    /// so the kernel tries the next handler.
    Foreign,
    /// Advance the pc by `width` bytes and resume.
    StepOver
    {
        record: FaultRecord,
        width: u64,
    },
    /// The pending progress single-step completed at `pc`; clear it and resume.
    ProgressConfirmed
    {
        pc: Address,
    },
    /// Log a backtrace, answer `KERN_FAILURE` and stop handling.
    Fatal
    {
        record: FaultRecord,
        cause: FatalCause,
    },
}

impl Verdict
{
    /// Returns `true` if the faulting thread is resumed by us.
    pub fn resumes(&self) -> bool
    {
        matches!(self, Verdict::StepOver { .. } | Verdict::ProgressConfirmed { .. })
    }
}

/// Decide how to answer `ctx`.
///
/// - `monitored`: port name of the thread the monitor was installed on.
/// - `step_pending`: a progress single-step was armed by the last stepover.
/// - `instruction_width`: fixed instruction width, `None` on variable-width
///   instruction sets.
///
/// A fault is resumable when either its canonical data address or its
/// canonical pc is registered. Debug traps with no pending single-step are
/// judged by their pc alone.
pub fn judge(
    ctx: &ExceptionContext,
    monitored: u32,
    registry: &StepoverRegistry,
    step_pending: bool,
    instruction_width: Option<u64>,
) -> Verdict
{
    if ctx.thread != monitored {
        return Verdict::Foreign;
    }

    let record = ctx.record(registry.canonicalizer());

    let registered = match ctx.class {
        FaultClass::BadAccess => registry.contains(record.address) || registry.contains(record.pc),
        FaultClass::DebugTrap if step_pending => return Verdict::ProgressConfirmed { pc: record.pc },
        FaultClass::DebugTrap => registry.contains(record.pc),
        FaultClass::Other(_) => {
            return Verdict::Fatal {
                record,
                cause: FatalCause::Unhandled,
            };
        }
    };

    match (registered, instruction_width) {
        (true, Some(width)) => Verdict::StepOver { record, width },
        (true, None) => Verdict::Fatal {
            record,
            cause: FatalCause::StepoverUnsupported,
        },
        (false, _) => Verdict::Fatal {
            record,
            cause: FatalCause::Unregistered,
        },
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::canonical::Canonicalizer;

    const MONITORED: u32 = 0x2503;

    fn bad_access(address: u64, pc: u64) -> ExceptionContext
    {
        ExceptionContext {
            thread: MONITORED,
            task: 0x203,
            class: FaultClass::BadAccess,
            codes: [1, address as i64],
            pc: Address::new(pc),
            fp: Address::ZERO,
            lr: Address::ZERO,
        }
    }

    fn registry(addresses: &[u64]) -> StepoverRegistry
    {
        let registry = StepoverRegistry::new(Canonicalizer::tagged(Some(47)));
        for &address in addresses {
            registry.register(Address::new(address));
        }
        registry
    }

    #[test]
    fn test_registered_data_address_steps_over()
    {
        let verdict = judge(&bad_access(0x1000, 0x1_0000_4000), MONITORED, &registry(&[0x1000]), false, Some(4));
        assert_eq!(
            verdict,
            Verdict::StepOver {
                record: FaultRecord {
                    class: FaultClass::BadAccess,
                    address: Address::new(0x1000),
                    pc: Address::new(0x1_0000_4000),
                },
                width: 4,
            }
        );
        assert!(verdict.resumes());
    }

    #[test]
    fn test_registered_pc_steps_over()
    {
        let verdict = judge(&bad_access(0xdead, 0x1_0000_4000), MONITORED, &registry(&[0x1_0000_4000]), false, Some(4));
        assert!(matches!(verdict, Verdict::StepOver { width: 4, .. }));
    }

    #[test]
    fn test_signed_pc_matches_plain_registration()
    {
        let verdict = judge(
            &bad_access(0xdead, 0x0027_0001_0000_4000),
            MONITORED,
            &registry(&[0x1_0000_4000]),
            false,
            Some(4),
        );
        assert!(matches!(verdict, Verdict::StepOver { record, .. } if record.pc == Address::new(0x1_0000_4000)));
    }

    #[test]
    fn test_unregistered_fault_is_fatal()
    {
        let verdict = judge(&bad_access(0x2000, 0x1_0000_4000), MONITORED, &registry(&[0x1000]), false, Some(4));
        assert!(matches!(
            verdict,
            Verdict::Fatal {
                cause: FatalCause::Unregistered,
                ..
            }
        ));
        assert!(!verdict.resumes());
    }

    #[test]
    fn test_variable_width_isa_is_fatal()
    {
        let verdict = judge(&bad_access(0x1000, 0x1_0000_4000), MONITORED, &registry(&[0x1000]), false, None);
        assert!(matches!(
            verdict,
            Verdict::Fatal {
                cause: FatalCause::StepoverUnsupported,
                ..
            }
        ));
    }

    #[test]
    fn test_other_thread_is_foreign()
    {
        let verdict = judge(&bad_access(0x1000, 0x1_0000_4000), MONITORED + 1, &registry(&[0x1000]), false, Some(4));
        assert_eq!(verdict, Verdict::Foreign);
    }

    #[test]
    fn test_pending_single_step_is_confirmed()
    {
        let mut ctx = bad_access(0, 0x1_0000_4004);
        ctx.class = FaultClass::DebugTrap;
        let verdict = judge(&ctx, MONITORED, &registry(&[]), true, Some(4));
        assert_eq!(
            verdict,
            Verdict::ProgressConfirmed {
                pc: Address::new(0x1_0000_4004)
            }
        );
    }

    #[test]
    fn test_unexpected_debug_trap_is_fatal()
    {
        let mut ctx = bad_access(0, 0x1_0000_4004);
        ctx.class = FaultClass::DebugTrap;
        let verdict = judge(&ctx, MONITORED, &registry(&[]), false, Some(4));
        assert!(matches!(
            verdict,
            Verdict::Fatal {
                cause: FatalCause::Unregistered,
                ..
            }
        ));
    }

    #[test]
    fn test_unhandled_class_is_fatal()
    {
        let mut ctx = bad_access(0x1000, 0x1_0000_4000);
        ctx.class = FaultClass::Other(3);
        let verdict = judge(&ctx, MONITORED, &registry(&[0x1000]), false, Some(4));
        assert!(matches!(verdict, Verdict::Fatal { cause: FatalCause::Unhandled, .. }));
    }

    #[test]
    fn test_fatal_state_is_terminal()
    {
        let state = SharedState::new(MonitorState::Armed);
        assert_eq!(state.advance(MonitorState::Handling), MonitorState::Handling);
        assert_eq!(state.advance(MonitorState::Fatal), MonitorState::Fatal);
        assert_eq!(state.advance(MonitorState::Armed), MonitorState::Fatal);
        assert_eq!(state.get(), MonitorState::Fatal);
        state.set(MonitorState::Idle);
        assert_eq!(state.get(), MonitorState::Idle);
    }

    #[test]
    fn test_live_monitor_token()
    {
        let token = LiveMonitor::acquire();
        assert!(live_monitor_count() >= 1);
        drop(token);
    }
}
