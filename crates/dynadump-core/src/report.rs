//! Fixed-size text buffers for reporting from the exception receiver.
//!
//! While a faulting thread is suspended it may hold the allocator lock or
//! the lock of a tracing writer, so the receiver formats its fatal report
//! into a [`StackWriter`] and hands the bytes straight to the file
//! descriptor. Structured logging resumes once the thread has been answered.

use std::fmt::{self, Write as _};

use crate::monitor::FatalCause;
use crate::types::{Address, FaultRecord};
use crate::unwind::Backtrace;

/// Size of the buffer a fatal report is formatted into.
pub const FATAL_REPORT_CAPACITY: usize = 4096;

/// Appended when a report did not fit its buffer.
const TRUNCATION_MARKER: &[u8] = b"...\n";

/// `fmt::Write` into an inline array. Output past the end is dropped.
pub struct StackWriter<const N: usize>
{
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> StackWriter<N>
{
    pub const fn new() -> Self
    {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }

    /// Bytes written so far. Ends with `...\n` if anything was dropped.
    pub fn as_bytes(&self) -> &[u8]
    {
        &self.buf[..self.len]
    }

    pub fn is_truncated(&self) -> bool
    {
        self.truncated
    }

    fn mark_truncated(&mut self)
    {
        if self.truncated {
            return;
        }
        self.truncated = true;
        if N < TRUNCATION_MARKER.len() {
            return;
        }
        let start = self.len.min(N - TRUNCATION_MARKER.len());
        self.buf[start..start + TRUNCATION_MARKER.len()].copy_from_slice(TRUNCATION_MARKER);
        self.len = start + TRUNCATION_MARKER.len();
    }
}

impl<const N: usize> Default for StackWriter<N>
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl<const N: usize> fmt::Write for StackWriter<N>
{
    fn write_str(&mut self, s: &str) -> fmt::Result
    {
        if self.truncated {
            return Ok(());
        }
        let room = N - self.len;
        let bytes = s.as_bytes();
        if bytes.len() <= room {
            self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
            self.len += bytes.len();
        } else {
            self.buf[self.len..].copy_from_slice(&bytes[..room]);
            self.len = N;
            self.mark_truncated();
        }
        Ok(())
    }
}

/// Format the report for a fault that could not be stepped over.
///
/// `backtrace` is `None` when the stack of the faulting thread could not be
/// located; the frame pointer is printed instead.
pub fn format_fatal_report<const N: usize>(
    out: &mut StackWriter<N>,
    record: &FaultRecord,
    cause: FatalCause,
    fp: Address,
    lr: Address,
    backtrace: Option<&Backtrace>,
)
{
    // StackWriter never fails, so the results carry nothing.
    let _ = writeln!(out, "dynadump: unrecoverable fault: {record}: {cause}");
    match backtrace {
        Some(backtrace) => {
            let _ = writeln!(out, "dynadump: lr {lr}, backtrace:");
            let _ = write!(out, "{backtrace}");
        }
        None => {
            let _ = writeln!(out, "dynadump: fp {fp}, lr {lr}, stack bounds unavailable");
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::fmt::Write;

    use super::*;
    use crate::canonical::Canonicalizer;
    use crate::types::FaultClass;
    use crate::unwind::{MemoryAccess, StackBounds};

    struct NoStack;

    impl MemoryAccess for NoStack
    {
        fn read_u64(&self, _address: Address) -> Option<u64>
        {
            None
        }
    }

    fn record() -> FaultRecord
    {
        FaultRecord {
            class: FaultClass::BadAccess,
            address: Address::new(0x2000),
            pc: Address::new(0x1_0000_4000),
        }
    }

    fn text<const N: usize>(out: &StackWriter<N>) -> &str
    {
        std::str::from_utf8(out.as_bytes()).unwrap()
    }

    #[test]
    fn test_writes_within_capacity()
    {
        let mut out = StackWriter::<16>::new();
        write!(out, "pc {}", 42).unwrap();
        assert_eq!(text(&out), "pc 42");
        assert!(!out.is_truncated());
    }

    #[test]
    fn test_overflow_is_truncated_with_marker()
    {
        let mut out = StackWriter::<12>::new();
        out.write_str("0123456789abcdef").unwrap();
        out.write_str("more").unwrap();
        assert!(out.is_truncated());
        assert_eq!(out.as_bytes().len(), 12);
        assert_eq!(text(&out), "01234567...\n");
    }

    #[test]
    fn test_tiny_buffer_never_panics()
    {
        let mut out = StackWriter::<2>::new();
        out.write_str("abc").unwrap();
        assert!(out.is_truncated());
        assert_eq!(text(&out), "ab");
    }

    #[test]
    fn test_fatal_report_with_backtrace()
    {
        let bounds = StackBounds {
            low: Address::new(0x7000_0000),
            high: Address::new(0x7000_1000),
        };
        let backtrace = Backtrace::capture(
            &NoStack,
            bounds,
            Canonicalizer::tagged(Some(47)),
            Address::new(0x1_0000_4000),
            Address::ZERO,
            8,
        );
        let mut out = StackWriter::<FATAL_REPORT_CAPACITY>::new();
        format_fatal_report(
            &mut out,
            &record(),
            FatalCause::Unregistered,
            Address::ZERO,
            Address::new(0x1_0000_3ff0),
            Some(&backtrace),
        );

        let report = text(&out);
        assert!(report.starts_with("dynadump: unrecoverable fault: EXC_BAD_ACCESS at 0x0000000000002000"));
        assert!(report.contains("address not registered for stepover"));
        assert!(report.contains("#0"));
        assert!(report.ends_with('\n'));
    }

    #[test]
    fn test_fatal_report_without_stack()
    {
        let mut out = StackWriter::<FATAL_REPORT_CAPACITY>::new();
        format_fatal_report(
            &mut out,
            &record(),
            FatalCause::ResumeFailed,
            Address::new(0x7000_0ff0),
            Address::ZERO,
            None,
        );

        let report = text(&out);
        assert!(report.contains("unrecoverable fault"));
        assert!(report.contains("stack bounds unavailable"));
        assert!(!report.contains("#0"));
    }
}
