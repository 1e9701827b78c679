//! Tests for the shared value types

use dynadump_core::canonical::{Canonicalizer, FixedAddressWidth};
use dynadump_core::config::{ProbeConfig, DEFAULT_TEARDOWN_TIMEOUT};
use dynadump_core::stepover::StepoverRegistry;
use dynadump_core::types::{Address, ExceptionContext, FaultClass};

#[test]
fn test_address_arithmetic()
{
    let addr = Address::new(0x1000);
    assert_eq!(addr + 4, Address::new(0x1004));
    assert_eq!(Address::new(0x1004) - 4, addr);
    assert_eq!(addr.checked_add(u64::MAX), None);
}

#[test]
fn test_address_display_is_zero_padded()
{
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    assert_eq!(format!("{:x}", Address::new(0xdead)), "dead");
}

#[test]
fn test_address_parse()
{
    assert_eq!("0x1_8000_4000".parse::<Address>().unwrap(), Address::new(0x1_8000_4000));
    assert!("nope".parse::<Address>().is_err());
}

#[test]
fn test_fault_class_from_raw()
{
    assert_eq!(FaultClass::from_raw(1), FaultClass::BadAccess);
    assert_eq!(FaultClass::from_raw(6), FaultClass::DebugTrap);
    assert_eq!(FaultClass::from_raw(3), FaultClass::Other(3));
}

#[test]
fn test_context_record_uses_data_address_for_bad_access()
{
    let ctx = ExceptionContext {
        thread: 0x1103,
        task: 0x203,
        class: FaultClass::BadAccess,
        codes: [1, 0x1000],
        pc: Address::new(0x1_0000_4000),
        fp: Address::new(0x16f_dff0),
        lr: Address::ZERO,
    };
    let record = ctx.record(Canonicalizer::tagged(None));
    assert_eq!(record.address, Address::new(0x1000));
    assert_eq!(record.pc, Address::new(0x1_0000_4000));

    let trap = ExceptionContext {
        class: FaultClass::DebugTrap,
        ..ctx
    };
    assert_eq!(trap.record(Canonicalizer::tagged(None)).address, trap.pc);
}

#[test]
fn test_tagged_canonicalizer_strips_signature_bits()
{
    let canon = Canonicalizer::tagged(Some(47));
    let signed = Address::new(0x002f_0001_8000_4000);
    assert_eq!(canon.canonicalize(signed), Address::new(0x1_8000_4000));
    assert!(!canon.is_canonical(signed));
    assert!(canon.is_canonical(Address::new(0x1_8000_4000)));
}

#[test]
fn test_unknown_width_is_permissive()
{
    let canon = Canonicalizer::tagged(None);
    assert_eq!(canon.canonicalize(Address::new(u64::MAX)), Address::new(u64::MAX));
    assert_eq!(Canonicalizer::tagged(Some(64)), canon);
}

#[test]
fn test_detect_from_fixed_width()
{
    let canon = Canonicalizer::detect(&FixedAddressWidth(Some(47)));
    #[cfg(target_arch = "aarch64")]
    assert_eq!(canon, Canonicalizer::tagged(Some(47)));
    #[cfg(not(target_arch = "aarch64"))]
    assert_eq!(canon, Canonicalizer::Plain);
}

#[test]
fn test_registry_matches_any_spelling_of_an_address()
{
    let registry = StepoverRegistry::new(Canonicalizer::tagged(Some(47)));
    registry.register(Address::new(0x00aa_0001_8000_4000));
    registry.register(Address::new(0x1_8000_4000));

    assert_eq!(registry.len(), 1);
    assert!(registry.contains(Address::new(0x1_8000_4000)));
    assert!(registry.contains(Address::new(0x0055_0001_8000_4000)));
    assert!(!registry.contains(Address::new(0x1_8000_4004)));

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn test_probe_config_defaults()
{
    let config = ProbeConfig::default();
    assert!(!config.verbose);
    assert!(!config.verify_progress);
    assert_eq!(config.teardown_timeout, DEFAULT_TEARDOWN_TIMEOUT);
    assert_eq!(config.with_max_backtrace_depth(0).max_backtrace_depth, 1);
}
