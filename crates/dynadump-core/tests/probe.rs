//! Orchestrator tests that do not fault on purpose.

#![cfg_attr(not(target_os = "macos"), allow(dead_code, unused_imports))]

use std::ffi::{c_void, CStr};
use std::sync::Arc;

use dynadump_core::canonical::Canonicalizer;
use dynadump_core::loader::ImageHandle;
use dynadump_core::stepover::StepoverRegistry;
use dynadump_core::{cleanup, safe_load, ProbeError, SafeLoader};

static MARKER: u8 = 0;

fn marker_handle() -> ImageHandle
{
    ImageHandle::from_raw(std::ptr::addr_of!(MARKER).cast::<c_void>().cast_mut()).unwrap()
}

fn private_registry() -> Arc<StepoverRegistry>
{
    Arc::new(StepoverRegistry::new(Canonicalizer::native()))
}

#[test]
fn test_default_probe_rejects_nul()
{
    let err = safe_load("libobjc\0.dylib").unwrap_err();
    assert!(matches!(err, ProbeError::InvalidArgument(_)));
}

#[test]
fn test_default_cleanup_is_idempotent()
{
    cleanup();
    cleanup();
}

#[cfg(not(target_os = "macos"))]
#[test]
fn test_probe_fails_setup_off_darwin()
{
    let err = safe_load("libSystem.B.dylib").unwrap_err();
    assert!(matches!(err, ProbeError::Setup(_)), "got {err:?}");
    assert!(err.is_setup_failure());
}

#[cfg(target_os = "macos")]
#[test]
fn test_loader_sees_identifier_and_result_is_returned()
{
    let loader = |image: &CStr| -> Result<ImageHandle, String> {
        assert_eq!(image.to_bytes(), b"libstub.dylib");
        Ok(marker_handle())
    };
    let mut probe = SafeLoader::new(loader).with_registry(private_registry());

    let image = probe.safe_load("libstub.dylib").unwrap();
    assert_eq!(image.handle, marker_handle());
    assert!(image.stepped_over.is_empty());
}

#[cfg(target_os = "macos")]
#[test]
fn test_repeated_probes_on_one_orchestrator()
{
    let loader = |_: &CStr| -> Result<ImageHandle, String> { Ok(marker_handle()) };
    let mut probe = SafeLoader::new(loader).with_registry(private_registry());

    for _ in 0..5 {
        assert!(probe.safe_load("libstub.dylib").is_ok());
    }
}

#[cfg(target_os = "macos")]
#[test]
fn test_panicking_loader_leaves_orchestrator_usable()
{
    use std::cell::Cell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    let should_panic = Cell::new(true);
    let loader = |_: &CStr| -> Result<ImageHandle, String> {
        if should_panic.replace(false) {
            panic!("loader blew up");
        }
        Ok(marker_handle())
    };
    let mut probe = SafeLoader::new(loader).with_registry(private_registry());

    let outcome = catch_unwind(AssertUnwindSafe(|| probe.safe_load("libstub.dylib")));
    assert!(outcome.is_err());

    probe.cleanup();
    assert!(probe.safe_load("libstub.dylib").is_ok());
}

#[cfg(target_os = "macos")]
#[test]
fn test_dlopen_of_missing_image_is_load_failure()
{
    let err = safe_load("/nonexistent/dynadump/libmissing.dylib").unwrap_err();
    match err {
        ProbeError::LoadFailed { reason, fault } => {
            assert!(!reason.is_empty());
            assert!(fault.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[cfg(target_os = "macos")]
#[test]
fn test_dlopen_of_system_library()
{
    let image = safe_load("/usr/lib/libSystem.B.dylib").unwrap();
    assert!(!image.handle.as_ptr().is_null());
}
