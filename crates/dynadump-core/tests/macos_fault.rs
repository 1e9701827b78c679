//! Probes whose loader faults on purpose.
//!
//! The fatal case ends the process, so it runs in a child copy of this test
//! binary and the parent inspects how the child died.

#![cfg(target_os = "macos")]

use std::ffi::{c_void, CStr};
use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::Arc;

use dynadump_core::canonical::Canonicalizer;
use dynadump_core::loader::ImageHandle;
use dynadump_core::stepover::StepoverRegistry;
#[cfg(target_arch = "aarch64")]
use dynadump_core::{
    config::ProbeConfig,
    types::{Address, FaultClass},
};
use dynadump_core::SafeLoader;

const CRASH_CHILD_ENV: &str = "DYNADUMP_CRASH_CHILD";
const UNREGISTERED_ADDRESS: u64 = 0x2000;

static MARKER: u8 = 0;

fn marker_handle() -> Result<ImageHandle, String>
{
    ImageHandle::from_raw(std::ptr::addr_of!(MARKER).cast::<c_void>().cast_mut()).ok_or_else(|| "null".to_string())
}

#[cfg(target_arch = "aarch64")]
#[test]
fn test_registered_fault_is_stepped_over()
{
    const FAULT_ADDRESS: u64 = 0x1000;

    let registry = Arc::new(StepoverRegistry::new(Canonicalizer::native()));
    registry.register(Address::new(FAULT_ADDRESS));

    let loader = |_: &CStr| {
        unsafe { std::ptr::write_volatile(FAULT_ADDRESS as usize as *mut u32, 0xdead_beef) };
        marker_handle()
    };
    let mut probe = SafeLoader::new(loader).with_registry(Arc::clone(&registry));

    let image = probe.safe_load("libfaulty.dylib").unwrap();
    assert_eq!(image.stepped_over.len(), 1);
    let fault = image.stepped_over[0];
    assert_eq!(fault.class, FaultClass::BadAccess);
    assert_eq!(fault.address, Address::new(FAULT_ADDRESS));

    // Registrations outlive the probe.
    assert!(registry.contains(Address::new(FAULT_ADDRESS)));

    // The same orchestrator keeps working afterwards.
    let again = probe.safe_load("libfaulty.dylib").unwrap();
    assert_eq!(again.stepped_over.len(), 1);
}

#[cfg(target_arch = "aarch64")]
#[test]
fn test_progress_is_verified_after_stepover()
{
    const FAULT_ADDRESS: u64 = 0x5000;

    let registry = Arc::new(StepoverRegistry::new(Canonicalizer::native()));
    registry.register(Address::new(FAULT_ADDRESS));

    let loader = |_: &CStr| {
        unsafe { std::ptr::write_volatile(FAULT_ADDRESS as usize as *mut u32, 0x0bad_f00d) };
        marker_handle()
    };
    let mut orchestrator = SafeLoader::new(loader)
        .with_registry(registry)
        .with_config(ProbeConfig::default().with_verify_progress(true));

    // The single-step trap after the stepover is consumed by the monitor
    // and not recorded as a second fault.
    let image = orchestrator.safe_load("libfaulty.dylib").unwrap();
    assert_eq!(image.stepped_over.len(), 1);
    assert_eq!(image.stepped_over[0].class, FaultClass::BadAccess);
    assert_eq!(image.stepped_over[0].address, Address::new(FAULT_ADDRESS));

    // Nothing is left armed for the next attempt.
    let again = orchestrator.safe_load("libfaulty.dylib").unwrap();
    assert_eq!(again.stepped_over.len(), 1);
}

#[cfg(target_arch = "aarch64")]
#[test]
fn test_fault_recorded_before_load_failure()
{
    const FAULT_ADDRESS: u64 = 0x3000;

    let registry = Arc::new(StepoverRegistry::new(Canonicalizer::native()));
    registry.register(Address::new(FAULT_ADDRESS));

    let loader = |_: &CStr| -> Result<ImageHandle, String> {
        let _ = unsafe { std::ptr::read_volatile(FAULT_ADDRESS as usize as *const u32) };
        Err("symbol not found".to_string())
    };
    let mut probe = SafeLoader::new(loader).with_registry(registry);

    match probe.safe_load("libfaulty.dylib") {
        Err(dynadump_core::ProbeError::LoadFailed { reason, fault }) => {
            assert_eq!(reason, "symbol not found");
            assert_eq!(fault.map(|f| f.address), Some(Address::new(FAULT_ADDRESS)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_unregistered_fault_is_fatal()
{
    if std::env::var_os(CRASH_CHILD_ENV).is_some() {
        crash_child();
    }

    let output = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", "test_unregistered_fault_is_fatal", "--nocapture", "--test-threads=1"])
        .env(CRASH_CHILD_ENV, "1")
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.signal().is_some(),
        "child should die from the fault, got {:?}\n{stderr}",
        output.status
    );
    assert!(stderr.contains("unrecoverable fault"), "missing fatal report:\n{stderr}");
    assert!(stderr.contains("0x0000000000002000"), "missing fault address:\n{stderr}");
    assert!(stderr.contains("#0"), "missing backtrace frame:\n{stderr}");
}

fn crash_child() -> !
{
    let config = dynadump_utils::LoggingConfig {
        ansi: false,
        ..dynadump_utils::LoggingConfig::default()
    };
    let _guard = dynadump_utils::init_logging_with_config(&config).unwrap();

    let registry = Arc::new(StepoverRegistry::new(Canonicalizer::native()));
    let loader = |_: &CStr| {
        let _ = unsafe { std::ptr::read_volatile(UNREGISTERED_ADDRESS as usize as *const u32) };
        marker_handle()
    };
    let mut probe = SafeLoader::new(loader).with_registry(registry);
    let outcome = probe.safe_load("libfaulty.dylib");

    // Only reachable if the fault was somehow resumed.
    eprintln!("probe returned: {outcome:?}");
    std::process::exit(0);
}
