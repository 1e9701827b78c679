//! Fault classification and per-exception context.

use std::fmt;

use super::Address;
use crate::canonical::Canonicalizer;

/// The two exception classes the monitor handles.
///
/// Values mirror `exception_types.h` (`EXC_BAD_ACCESS`, `EXC_BREAKPOINT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass
{
    /// Could not access memory (SIGSEGV/SIGBUS).
    ///
    /// `code[0]` is a `kern_return_t`, `code[1]` the bad address.
    BadAccess,
    /// Single step or hardware/software breakpoint.
    DebugTrap,
    /// Any other exception type, carried through for logging only.
    Other(i32),
}

impl FaultClass
{
    /// `EXC_BAD_ACCESS`
    pub const EXC_BAD_ACCESS: i32 = 1;
    /// `EXC_BREAKPOINT`
    pub const EXC_BREAKPOINT: i32 = 6;

    /// Classify a raw `exception_type_t`.
    pub const fn from_raw(exception: i32) -> Self
    {
        match exception {
            Self::EXC_BAD_ACCESS => FaultClass::BadAccess,
            Self::EXC_BREAKPOINT => FaultClass::DebugTrap,
            other => FaultClass::Other(other),
        }
    }
}

impl fmt::Display for FaultClass
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            FaultClass::BadAccess => f.write_str("EXC_BAD_ACCESS"),
            FaultClass::DebugTrap => f.write_str("EXC_BREAKPOINT"),
            FaultClass::Other(code) => write!(f, "exception {code}"),
        }
    }
}

/// A fault the monitor saw and resolved.
///
/// Returned to callers inside [`crate::probe::LoadedImage`] and
/// [`crate::error::ProbeError::LoadFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord
{
    /// Exception class.
    pub class: FaultClass,
    /// Faulting data address (canonicalized). Equal to `pc` for debug traps.
    pub address: Address,
    /// Instruction that faulted (canonicalized).
    pub pc: Address,
}

impl fmt::Display for FaultRecord
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} at {} (pc {})", self.class, self.address, self.pc)
    }
}

/// State captured from one exception message.
///
/// Built by the monitor's receiver for the duration of a single
/// request/reply exchange and dropped once the kernel has been answered.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionContext
{
    /// Mach port name of the faulting thread.
    pub thread: u32,
    /// Mach port name of the faulting task.
    pub task: u32,
    /// Exception class.
    pub class: FaultClass,
    /// Raw 64-bit exception codes.
    pub codes: [i64; 2],
    /// Program counter at the fault.
    pub pc: Address,
    /// Frame pointer at the fault.
    pub fp: Address,
    /// Link register (zero where the architecture has none).
    pub lr: Address,
}

impl ExceptionContext
{
    /// Faulting data address for bad-access faults, the pc otherwise.
    pub fn fault_address(&self) -> Address
    {
        match self.class {
            FaultClass::BadAccess => Address::new(self.codes[1] as u64),
            _ => self.pc,
        }
    }

    /// Summarise this context, with both addresses canonicalized.
    pub fn record(&self, canonicalizer: Canonicalizer) -> FaultRecord
    {
        FaultRecord {
            class: self.class,
            address: canonicalizer.canonicalize(self.fault_address()),
            pc: canonicalizer.canonicalize(self.pc),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn context(class: FaultClass) -> ExceptionContext
    {
        ExceptionContext {
            thread: 0x1003,
            task: 0x103,
            class,
            codes: [2, 0x1000],
            pc: Address::new(0x1_0000_4000),
            fp: Address::new(0x16f_dff0),
            lr: Address::ZERO,
        }
    }

    #[test]
    fn test_classify_raw_exception()
    {
        assert_eq!(FaultClass::from_raw(1), FaultClass::BadAccess);
        assert_eq!(FaultClass::from_raw(6), FaultClass::DebugTrap);
        assert_eq!(FaultClass::from_raw(3), FaultClass::Other(3));
    }

    #[test]
    fn test_bad_access_reports_data_address()
    {
        let ctx = context(FaultClass::BadAccess);
        assert_eq!(ctx.fault_address(), Address::new(0x1000));
        assert_eq!(ctx.record(Canonicalizer::tagged(None)).pc, ctx.pc);
    }

    #[test]
    fn test_record_strips_tag_bits()
    {
        let mut ctx = context(FaultClass::BadAccess);
        ctx.codes[1] = 0xff00_0000_0000_1000_u64 as i64;
        ctx.pc = Address::new(0x8000_0001_0000_4000);

        let record = ctx.record(Canonicalizer::tagged(Some(47)));
        assert_eq!(record.address, Address::new(0x1000));
        assert_eq!(record.pc, Address::new(0x1_0000_4000));
        assert_eq!(record.class, FaultClass::BadAccess);
    }

    #[test]
    fn test_debug_trap_reports_pc()
    {
        let ctx = context(FaultClass::DebugTrap);
        assert_eq!(ctx.fault_address(), ctx.pc);
    }
}
