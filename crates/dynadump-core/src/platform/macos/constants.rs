//! # macOS Platform Constants
//!
//! Centralized constants for the Mach exception monitor.
//!
//! ## Organization
//!
//! Constants are organized by category:
//! - Thread and debug state flavors and counts
//! - Single-step control bits
//! - Instruction widths
//! - Exception masks and behaviors
//! - Message identifiers

use libc::{c_int, mach_msg_type_number_t};

// ============================================================================
// Thread State Flavors
// ============================================================================

/// ARM64 thread state flavor (flavor 6)
///
/// Used with `thread_get_state()` and `thread_set_state()` to read/write
/// ARM64 general-purpose registers (X0-X30, SP, PC, CPSR).
#[cfg(target_arch = "aarch64")]
pub const ARM_THREAD_STATE64: c_int = 6;

/// ARM64 thread state count (68 u32 values)
///
/// Each 64-bit register is stored as two u32 values.
#[cfg(target_arch = "aarch64")]
pub const ARM_THREAD_STATE64_COUNT: mach_msg_type_number_t = 68;

/// ARM64 debug state flavor (flavor 15)
///
/// DBGBVR/DBGBCR, DBGWVR/DBGWCR and `MDSCR_EL1`, which carries the
/// single-step enable bit.
#[cfg(target_arch = "aarch64")]
pub const ARM_DEBUG_STATE64: c_int = 15;

/// ARM64 debug state count (520 bytes / 4 = 130 u32 values)
#[cfg(target_arch = "aarch64")]
pub const ARM_DEBUG_STATE64_COUNT: mach_msg_type_number_t = 130;

/// x86-64 thread state flavor (flavor 4)
#[cfg(target_arch = "x86_64")]
pub const X86_THREAD_STATE64: c_int = 4;

/// x86-64 thread state count (42 u32 values)
#[cfg(target_arch = "x86_64")]
pub const X86_THREAD_STATE64_COUNT: mach_msg_type_number_t = 42;

/// Flavor handed to the kernel when registering the exception port.
///
/// `EXCEPTION_DEFAULT` messages carry no thread state, but the kernel still
/// validates the flavor, so we pass the native general-purpose one.
#[cfg(target_arch = "aarch64")]
pub const NATIVE_THREAD_STATE_FLAVOR: c_int = ARM_THREAD_STATE64;

#[cfg(target_arch = "x86_64")]
pub const NATIVE_THREAD_STATE_FLAVOR: c_int = X86_THREAD_STATE64;

// ============================================================================
// Single-Step Control
// ============================================================================

/// `MDSCR_EL1.SS`: software step enable.
#[cfg(target_arch = "aarch64")]
pub const ARM64_MDSCR_SS_ENABLE: u64 = 1;

/// `RFLAGS.TF`: trap after the next instruction.
#[cfg(target_arch = "x86_64")]
pub const X86_RFLAGS_TRAP: u64 = 1 << 8;

// ============================================================================
// Instruction Widths
// ============================================================================

/// Bytes to advance the pc to step past a faulting instruction, if the
/// instruction set has a fixed width.
///
/// ARM64 uses fixed-length 32-bit instructions. x86-64 instructions are
/// 1 to 15 bytes and cannot be skipped without decoding them.
#[cfg(target_arch = "aarch64")]
pub const FIXED_INSTRUCTION_WIDTH: Option<u64> = Some(4);

#[cfg(not(target_arch = "aarch64"))]
pub const FIXED_INSTRUCTION_WIDTH: Option<u64> = None;

// ============================================================================
// Exception Masks and Behaviors
// ============================================================================

/// `EXC_MASK_BAD_ACCESS` (1 << EXC_BAD_ACCESS)
pub const EXC_MASK_BAD_ACCESS: u32 = 1 << 1;

/// `EXC_MASK_BREAKPOINT` (1 << EXC_BREAKPOINT)
pub const EXC_MASK_BREAKPOINT: u32 = 1 << 6;

/// Exceptions the monitor takes over for the probing thread.
pub const MONITORED_EXCEPTIONS: u32 = EXC_MASK_BAD_ACCESS | EXC_MASK_BREAKPOINT;

/// `EXCEPTION_DEFAULT`: send `exception_raise` without thread state.
pub const EXCEPTION_DEFAULT: c_int = 1;

/// `MACH_EXCEPTION_CODES`: deliver 64-bit codes (`mach_exception_raise`).
pub const MACH_EXCEPTION_CODES: c_int = 0x8000_0000_u32 as c_int;

/// Upper bound on distinct handler slots `thread_swap_exception_ports` can
/// report (`EXC_TYPES_COUNT`).
pub const EXC_TYPES_COUNT: usize = 14;

// ============================================================================
// Message Identifiers
// ============================================================================

/// `msgh_id` of `mach_exception_raise` requests.
pub const MACH_EXCEPTION_RAISE_ID: i32 = 2405;

/// Replies use the request id plus 100 (MIG convention).
pub const MIG_REPLY_OFFSET: i32 = 100;

/// `msgh_id` of the control message that tells the receiver to exit.
pub const SHUTDOWN_MESSAGE_ID: i32 = 0x6479_6478; // "dydx"

/// Size of the receive buffer. Larger than any request we accept plus the
/// maximum trailer.
pub const RECEIVE_BUFFER_SIZE: usize = 512;

/// Send timeout for the shutdown control message, in milliseconds.
pub const SHUTDOWN_SEND_TIMEOUT_MS: u32 = 100;
