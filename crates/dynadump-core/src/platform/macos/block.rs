//! Stack block literals for C APIs that take a `void (^)(void *)` callback.
//!
//! Only the layout the blocks runtime requires of a block without copy or
//! dispose helpers is built. The callee must invoke the block before the
//! call returns, which is true of the dyld enumeration SPIs.
//!
//! See: [Block ABI](https://clang.llvm.org/docs/Block-ABI-Apple.html)

use std::ffi::{c_int, c_ulong, c_void};
use std::mem;
use std::ptr;

use crate::platform::macos::ffi;

#[repr(C)]
struct BlockDescriptor
{
    reserved: c_ulong,
    size: c_ulong,
}

/// `struct Block_literal_1` with one captured variable: the Rust callback.
#[repr(C)]
struct StackBlock<'a>
{
    isa: *const c_void,
    flags: c_int,
    reserved: c_int,
    invoke: unsafe extern "C" fn(*mut c_void, *mut c_void),
    descriptor: *const BlockDescriptor,
    callback: &'a mut dyn FnMut(*mut c_void),
}

static DESCRIPTOR: BlockDescriptor = BlockDescriptor {
    reserved: 0,
    size: mem::size_of::<StackBlock<'static>>() as c_ulong,
};

unsafe extern "C" fn invoke(block: *mut c_void, arg: *mut c_void)
{
    let block = &mut *block.cast::<StackBlock<'_>>();
    (block.callback)(arg);
}

/// Run `body` with a block that forwards each invocation to `callback`.
///
/// The pointer handed to `body` is only valid for the duration of the call.
pub(crate) fn with_block<R>(callback: &mut dyn FnMut(*mut c_void), body: impl FnOnce(*mut c_void) -> R) -> R
{
    let mut block = StackBlock {
        isa: unsafe { ptr::addr_of!(ffi::_NSConcreteStackBlock) }.cast(),
        flags: 0,
        reserved: 0,
        invoke,
        descriptor: &DESCRIPTOR,
        callback,
    };
    body(ptr::addr_of_mut!(block).cast())
}
