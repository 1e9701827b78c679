//! # Thread State Access
//!
//! Read and patch the registers of a thread parked in an exception.
//!
//! Only the handful of registers the monitor needs are exposed: pc, frame
//! pointer and link register for the context and the backtrace, pc again
//! for stepping over a faulting instruction, and the single-step control
//! bit for progress verification.
//!
//! See:
//! - [thread_get_state(3) man page](https://developer.apple.com/documentation/kernel/1418576-thread_get_state/)
//! - [thread_set_state(3) man page](https://developer.apple.com/documentation/kernel/1418827-thread_set_state/)

use libc::{natural_t, thread_act_t};

use crate::platform::macos::constants;
use crate::platform::macos::error::{kern_result, MachError};
use crate::platform::macos::ffi;
use crate::types::Address;

/// Registers captured at the fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRegisters
{
    pub pc: Address,
    pub fp: Address,
    /// Zero on x86-64.
    pub lr: Address,
}

/// `arm_thread_state64_t`
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[allow(dead_code)] // full kernel layout
#[derive(Debug, Clone, Copy, Default)]
struct Arm64ThreadState
{
    x: [u64; 29],
    fp: u64,
    lr: u64,
    sp: u64,
    pc: u64,
    cpsr: u32,
    flags: u32,
}

/// `arm_debug_state64_t`
#[cfg(target_arch = "aarch64")]
#[repr(C)]
#[allow(dead_code)] // full kernel layout
#[derive(Debug, Clone, Copy)]
struct Arm64DebugState
{
    bvr: [u64; 16],
    bcr: [u64; 16],
    wvr: [u64; 16],
    wcr: [u64; 16],
    mdscr_el1: u64,
}

/// `x86_thread_state64_t`
#[cfg(target_arch = "x86_64")]
#[repr(C)]
#[allow(dead_code)] // full kernel layout
#[derive(Debug, Clone, Copy, Default)]
struct X86ThreadState64
{
    rax: u64,
    rbx: u64,
    rcx: u64,
    rdx: u64,
    rdi: u64,
    rsi: u64,
    rbp: u64,
    rsp: u64,
    r8: u64,
    r9: u64,
    r10: u64,
    r11: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    rip: u64,
    rflags: u64,
    cs: u64,
    fs: u64,
    gs: u64,
}

/// Read a state structure of flavor `flavor` from `thread`.
///
/// `T` must be the `repr(C)` layout the kernel uses for `flavor` and `count`
/// must be its size in `natural_t` words.
unsafe fn get_state<T: Copy>(
    thread: thread_act_t,
    flavor: libc::c_int,
    count: libc::mach_msg_type_number_t,
    mut state: T,
) -> Result<T, MachError>
{
    debug_assert_eq!(std::mem::size_of::<T>(), count as usize * std::mem::size_of::<natural_t>());
    let mut actual = count;
    let kr = ffi::thread_get_state(thread, flavor, (&mut state as *mut T).cast::<natural_t>(), &mut actual);
    kern_result(kr)?;
    Ok(state)
}

unsafe fn set_state<T: Copy>(
    thread: thread_act_t,
    flavor: libc::c_int,
    count: libc::mach_msg_type_number_t,
    state: &T,
) -> Result<(), MachError>
{
    let kr = ffi::thread_set_state(thread, flavor, (state as *const T).cast::<natural_t>(), count);
    kern_result(kr)
}

/// Read pc, fp and lr of `thread`.
#[cfg(target_arch = "aarch64")]
pub fn frame_registers(thread: thread_act_t) -> Result<FrameRegisters, MachError>
{
    let state = unsafe {
        get_state(
            thread,
            constants::ARM_THREAD_STATE64,
            constants::ARM_THREAD_STATE64_COUNT,
            Arm64ThreadState::default(),
        )?
    };
    Ok(FrameRegisters {
        pc: Address::new(state.pc),
        fp: Address::new(state.fp),
        lr: Address::new(state.lr),
    })
}

#[cfg(target_arch = "x86_64")]
pub fn frame_registers(thread: thread_act_t) -> Result<FrameRegisters, MachError>
{
    let state = unsafe {
        get_state(
            thread,
            constants::X86_THREAD_STATE64,
            constants::X86_THREAD_STATE64_COUNT,
            X86ThreadState64::default(),
        )?
    };
    Ok(FrameRegisters {
        pc: Address::new(state.rip),
        fp: Address::new(state.rbp),
        lr: Address::ZERO,
    })
}

/// Move the pc of `thread` forward by `width` bytes. Returns the new pc.
#[cfg(target_arch = "aarch64")]
pub fn advance_pc(thread: thread_act_t, width: u64) -> Result<Address, MachError>
{
    unsafe {
        let mut state = get_state(
            thread,
            constants::ARM_THREAD_STATE64,
            constants::ARM_THREAD_STATE64_COUNT,
            Arm64ThreadState::default(),
        )?;
        state.pc = state.pc.wrapping_add(width);
        set_state(thread, constants::ARM_THREAD_STATE64, constants::ARM_THREAD_STATE64_COUNT, &state)?;
        Ok(Address::new(state.pc))
    }
}

#[cfg(target_arch = "x86_64")]
pub fn advance_pc(thread: thread_act_t, width: u64) -> Result<Address, MachError>
{
    unsafe {
        let mut state = get_state(
            thread,
            constants::X86_THREAD_STATE64,
            constants::X86_THREAD_STATE64_COUNT,
            X86ThreadState64::default(),
        )?;
        state.rip = state.rip.wrapping_add(width);
        set_state(thread, constants::X86_THREAD_STATE64, constants::X86_THREAD_STATE64_COUNT, &state)?;
        Ok(Address::new(state.rip))
    }
}

/// Enable or disable hardware single-step for `thread`.
///
/// With single-step enabled the thread raises `EXC_BREAKPOINT` after
/// executing one instruction.
#[cfg(target_arch = "aarch64")]
pub fn set_single_step(thread: thread_act_t, enabled: bool) -> Result<(), MachError>
{
    unsafe {
        let mut state = get_state(
            thread,
            constants::ARM_DEBUG_STATE64,
            constants::ARM_DEBUG_STATE64_COUNT,
            Arm64DebugState {
                bvr: [0; 16],
                bcr: [0; 16],
                wvr: [0; 16],
                wcr: [0; 16],
                mdscr_el1: 0,
            },
        )?;
        if enabled {
            state.mdscr_el1 |= constants::ARM64_MDSCR_SS_ENABLE;
        } else {
            state.mdscr_el1 &= !constants::ARM64_MDSCR_SS_ENABLE;
        }
        set_state(thread, constants::ARM_DEBUG_STATE64, constants::ARM_DEBUG_STATE64_COUNT, &state)
    }
}

#[cfg(target_arch = "x86_64")]
pub fn set_single_step(thread: thread_act_t, enabled: bool) -> Result<(), MachError>
{
    unsafe {
        let mut state = get_state(
            thread,
            constants::X86_THREAD_STATE64,
            constants::X86_THREAD_STATE64_COUNT,
            X86ThreadState64::default(),
        )?;
        if enabled {
            state.rflags |= constants::X86_RFLAGS_TRAP;
        } else {
            state.rflags &= !constants::X86_RFLAGS_TRAP;
        }
        set_state(thread, constants::X86_THREAD_STATE64, constants::X86_THREAD_STATE64_COUNT, &state)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_state_layouts_match_counts()
    {
        #[cfg(target_arch = "aarch64")]
        {
            assert_eq!(std::mem::size_of::<Arm64ThreadState>(), 68 * 4);
            assert_eq!(std::mem::size_of::<Arm64DebugState>(), 130 * 4);
        }
        #[cfg(target_arch = "x86_64")]
        assert_eq!(std::mem::size_of::<X86ThreadState64>(), 42 * 4);
    }

    #[test]
    fn test_read_own_registers_from_helper_thread()
    {
        let target = crate::platform::macos::guards::ThreadPort::current();
        let name = target.name();
        let regs = std::thread::scope(|s| s.spawn(move || frame_registers(name)).join().unwrap()).unwrap();
        assert!(!regs.pc.is_null());
    }
}
