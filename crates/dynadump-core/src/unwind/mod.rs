//! # Frame-Pointer Unwinding
//!
//! Reconstructs a backtrace from the frame-pointer chain of a faulting
//! thread. Used only for diagnostics on the fatal path; nothing here
//! influences whether a fault is resumed.
//!
//! Both supported ABIs lay frames out the same way: the frame pointer points
//! at a two-word record `{ caller_fp, return_address }`.
//!
//! ```text
//!   high addresses (stack base)
//!   +------------------+
//!   | return address   |  fp + 8
//!   | caller fp  ------+--> next record
//!   +------------------+  <- fp
//!   low addresses
//! ```
//!
//! The chain is never trusted to terminate on its own. The walker stops on a
//! null link, a frame pointer outside the thread's stack, a misaligned frame
//! pointer, a link that does not move towards the stack base, or after
//! `max_depth` frames.

use smallvec::SmallVec;

use crate::canonical::Canonicalizer;
use crate::types::Address;

/// Default bound on walked frames.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Minimal memory accessor required for stack unwinding.
pub trait MemoryAccess
{
    /// Read a 64-bit word, or `None` if `address` cannot be read.
    fn read_u64(&self, address: Address) -> Option<u64>;
}

/// Half-open range `[low, high)` a frame pointer must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds
{
    /// Lowest valid address (stack limit).
    pub low: Address,
    /// One past the highest valid address (stack base).
    pub high: Address,
}

impl StackBounds
{
    /// Build bounds from the stack base (highest address) and size, the
    /// shape `pthread_get_stackaddr_np`/`pthread_get_stacksize_np` return.
    pub fn from_base_and_size(base: Address, size: u64) -> Self
    {
        Self {
            low: base - size,
            high: base,
        }
    }

    /// Returns `true` if a whole frame record at `fp` lies inside the stack.
    pub fn contains_record(&self, fp: Address) -> bool
    {
        fp >= self.low && fp.checked_add(FRAME_RECORD_SIZE).is_some_and(|end| end <= self.high)
    }
}

const FRAME_RECORD_SIZE: u64 = 16;
const FRAME_ALIGN: u64 = 8;

/// One link of the frame-pointer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNode
{
    /// Caller's frame pointer.
    pub next: Address,
    /// Return address saved in this frame.
    pub return_address: Address,
}

impl FrameNode
{
    /// Read the record at `fp`.
    pub fn read<M: MemoryAccess>(memory: &M, fp: Address) -> Option<Self>
    {
        let next = memory.read_u64(fp)?;
        let return_address = memory.read_u64(fp + 8)?;
        Some(Self {
            next: Address::new(next),
            return_address: Address::new(return_address),
        })
    }
}

/// Lazy, finite walk over a frame-pointer chain yielding canonical return
/// addresses. Not restartable: once exhausted it stays exhausted.
pub struct FramePointerWalker<'a, M>
{
    memory: &'a M,
    bounds: StackBounds,
    canonicalizer: Canonicalizer,
    fp: Address,
    remaining: usize,
}

impl<'a, M: MemoryAccess> FramePointerWalker<'a, M>
{
    pub fn new(memory: &'a M, bounds: StackBounds, canonicalizer: Canonicalizer, fp: Address, max_depth: usize) -> Self
    {
        Self {
            memory,
            bounds,
            canonicalizer,
            fp,
            remaining: max_depth,
        }
    }

    fn stop(&mut self) -> Option<Address>
    {
        self.remaining = 0;
        None
    }
}

impl<M: MemoryAccess> Iterator for FramePointerWalker<'_, M>
{
    type Item = Address;

    fn next(&mut self) -> Option<Address>
    {
        if self.remaining == 0 || self.fp.is_null() {
            return self.stop();
        }
        if !self.fp.is_aligned(FRAME_ALIGN) || !self.bounds.contains_record(self.fp) {
            return self.stop();
        }

        let Some(node) = FrameNode::read(self.memory, self.fp) else {
            return self.stop();
        };

        let return_address = self.canonicalizer.canonicalize(node.return_address);
        if return_address.is_null() {
            return self.stop();
        }

        // Frames grow down, so every caller record sits strictly higher.
        // A null link ends the walk on the next call.
        if !node.next.is_null() && node.next <= self.fp {
            self.remaining = 1;
        }
        self.fp = node.next;
        self.remaining -= 1;

        Some(return_address)
    }
}

/// Reads the current address space, refusing anything outside `bounds`.
///
/// Only safe for stacks of threads that cannot exit while we read, which
/// holds for a thread parked in an exception handler.
#[derive(Debug, Clone, Copy)]
pub struct LocalStack
{
    bounds: StackBounds,
}

impl LocalStack
{
    pub fn new(bounds: StackBounds) -> Self
    {
        Self { bounds }
    }
}

impl MemoryAccess for LocalStack
{
    fn read_u64(&self, address: Address) -> Option<u64>
    {
        if !address.is_aligned(FRAME_ALIGN) || address < self.bounds.low || address + 8 > self.bounds.high {
            return None;
        }
        Some(unsafe { std::ptr::read_volatile(address.as_ptr::<u64>()) })
    }
}

/// Addresses collected for a fatal-fault report.
///
/// Frame 0 is the faulting pc; the rest come from the frame-pointer walk.
/// The inline capacity covers [`DEFAULT_MAX_DEPTH`] so capturing does not
/// allocate on the fault path.
#[derive(Debug, Clone, Default)]
pub struct Backtrace
{
    frames: SmallVec<[Address; DEFAULT_MAX_DEPTH + 1]>,
}

impl Backtrace
{
    /// Capture starting from the faulting `pc` and frame pointer `fp`.
    pub fn capture<M: MemoryAccess>(
        memory: &M,
        bounds: StackBounds,
        canonicalizer: Canonicalizer,
        pc: Address,
        fp: Address,
        max_depth: usize,
    ) -> Self
    {
        let mut frames = SmallVec::new();
        frames.push(canonicalizer.canonicalize(pc));
        frames.extend(FramePointerWalker::new(memory, bounds, canonicalizer, fp, max_depth));
        Self { frames }
    }

    pub fn frames(&self) -> &[Address]
    {
        &self.frames
    }

    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }
}

impl std::fmt::Display for Backtrace
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        for (index, frame) in self.frames.iter().enumerate() {
            writeln!(f, "  #{index:<3} {frame}")?;
        }
        Ok(())
    }
}
