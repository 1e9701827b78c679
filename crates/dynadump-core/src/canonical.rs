//! # Address Canonicalization
//!
//! Strips pointer-authentication and tag bits so that addresses can be
//! compared and logged reliably.
//!
//! On arm64e every code pointer the CPU hands us (saved link registers,
//! pointers read out of frames) may carry a PAC signature in the bits above
//! the virtual address width. The width is a property of the running kernel,
//! read once from `sysctlbyname("machdep.virtual_address_size")`. On
//! platforms without pointer tagging canonicalization is the identity.
//!
//! [`Canonicalizer::canonicalize`] is a single mask operation: no
//! allocation, no locks, safe to call from the exception receiver while the
//! faulting thread is suspended.

use once_cell::sync::Lazy;
#[cfg(target_os = "macos")]
use tracing::debug;

use crate::types::Address;

/// Source of the process's virtual address width in bits.
pub trait AddressWidthSource
{
    /// Return the width, or `None` if it could not be determined.
    fn address_bits(&self) -> Option<u32>;
}

/// Queries `machdep.virtual_address_size` through `sysctlbyname`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysctlAddressWidth;

impl AddressWidthSource for SysctlAddressWidth
{
    #[cfg(target_os = "macos")]
    fn address_bits(&self) -> Option<u32>
    {
        let mut bits: u32 = 0;
        let mut len = std::mem::size_of::<u32>();
        let rc = unsafe {
            libc::sysctlbyname(
                c"machdep.virtual_address_size".as_ptr(),
                (&mut bits as *mut u32).cast(),
                &mut len,
                std::ptr::null_mut(),
                0,
            )
        };
        if rc != 0 || bits == 0 {
            debug!("machdep.virtual_address_size unavailable, using permissive mask");
            return None;
        }
        Some(bits)
    }

    #[cfg(not(target_os = "macos"))]
    fn address_bits(&self) -> Option<u32>
    {
        None
    }
}

/// Fixed width, for tests and for callers that already know it.
#[derive(Debug, Clone, Copy)]
pub struct FixedAddressWidth(pub Option<u32>);

impl AddressWidthSource for FixedAddressWidth
{
    fn address_bits(&self) -> Option<u32>
    {
        self.0
    }
}

/// Pointer canonicalization strategy.
///
/// The variant is chosen at build time by [`Canonicalizer::native`]:
/// `Tagged` on aarch64, `Plain` everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonicalizer
{
    /// Clear every bit outside `mask`.
    Tagged
    {
        /// Bits that belong to the address proper.
        mask: u64,
    },
    /// Addresses are already canonical.
    Plain,
}

static NATIVE: Lazy<Canonicalizer> = Lazy::new(|| Canonicalizer::detect(&SysctlAddressWidth));

impl Canonicalizer
{
    /// Canonicalizer for the running process.
    ///
    /// The address width is queried at most once per process; later calls
    /// return the cached value.
    pub fn native() -> Self
    {
        *NATIVE
    }

    /// Build the build-target variant from an explicit width source.
    #[cfg(target_arch = "aarch64")]
    pub fn detect(source: &dyn AddressWidthSource) -> Self
    {
        Self::tagged(source.address_bits())
    }

    /// Build the build-target variant from an explicit width source.
    #[cfg(not(target_arch = "aarch64"))]
    pub fn detect(_source: &dyn AddressWidthSource) -> Self
    {
        Canonicalizer::Plain
    }

    /// Tagged canonicalizer for a given width.
    ///
    /// `None` and widths of 64 or more produce the permissive all-ones mask:
    /// nothing is cleared and every address is treated as canonical.
    pub const fn tagged(bits: Option<u32>) -> Self
    {
        let mask = match bits {
            Some(bits) if bits > 0 && bits < 64 => (1u64 << bits) - 1,
            _ => u64::MAX,
        };
        Canonicalizer::Tagged { mask }
    }

    /// Strip non-address bits from `address`.
    #[inline]
    pub const fn canonicalize(self, address: Address) -> Address
    {
        match self {
            Canonicalizer::Tagged { mask } => Address::new(address.value() & mask),
            Canonicalizer::Plain => address,
        }
    }

    /// Returns `true` if `address` has no bits outside the address range.
    pub const fn is_canonical(self, address: Address) -> bool
    {
        self.canonicalize(address).value() == address.value()
    }
}

impl Default for Canonicalizer
{
    fn default() -> Self
    {
        Self::native()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_tagged_strips_high_bits()
    {
        let canon = Canonicalizer::tagged(Some(47));
        let signed = Address::new(0x002d_0001_0000_4000);
        assert_eq!(canon.canonicalize(signed), Address::new(0x0000_0001_0000_4000));
    }

    #[test]
    fn test_canonicalize_is_idempotent()
    {
        let canon = Canonicalizer::tagged(Some(39));
        for raw in [0u64, 0x1000, 0x7f_ffff_ffff, 0xffff_ff80_0000_1234, u64::MAX] {
            let once = canon.canonicalize(Address::new(raw));
            assert_eq!(canon.canonicalize(once), once);
            assert!(canon.is_canonical(once));
        }
    }

    #[test]
    fn test_failed_query_is_permissive()
    {
        let canon = Canonicalizer::tagged(FixedAddressWidth(None).address_bits());
        assert_eq!(canon, Canonicalizer::Tagged { mask: u64::MAX });
        assert_eq!(canon.canonicalize(Address::new(u64::MAX)), Address::new(u64::MAX));
    }

    #[test]
    fn test_oversized_width_is_permissive()
    {
        assert_eq!(Canonicalizer::tagged(Some(64)), Canonicalizer::Tagged { mask: u64::MAX });
        assert_eq!(Canonicalizer::tagged(Some(0)), Canonicalizer::Tagged { mask: u64::MAX });
    }

    #[test]
    fn test_plain_is_identity()
    {
        let addr = Address::new(0xdead_beef_0000_1000);
        assert_eq!(Canonicalizer::Plain.canonicalize(addr), addr);
    }

    #[test]
    fn test_native_is_stable()
    {
        assert_eq!(Canonicalizer::native(), Canonicalizer::native());
        assert_eq!(Canonicalizer::native().canonicalize(Address::new(0x1000)), Address::new(0x1000));
    }
}
