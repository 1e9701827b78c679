//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address
///
/// This wrapper around `u64` keeps instruction addresses, data addresses and
/// frame pointers from being mixed up with sizes or counts. Addresses handed
/// to the stepover registry and printed in backtraces are canonicalized first
/// (see [`crate::canonical`]), so two spellings of the same signed pointer
/// compare equal.
///
/// ## Example
///
/// ```rust
/// use dynadump_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 4; // step one aarch64 instruction
/// assert_eq!(next_addr.value(), 0x1004);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Terminates frame-pointer chains.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use dynadump_core::types::Address;
    ///
    /// const FAULT_SITE: Address = Address::new(0x1000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Returns `true` if the address is a multiple of `align` (a power of two).
    pub const fn is_aligned(self, align: u64) -> bool
    {
        self.0 & (align - 1) == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use dynadump_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Build an address from a raw pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Self
    {
        Address(ptr as usize as u64)
    }

    /// View this address as a raw pointer in the current address space.
    pub fn as_ptr<T>(self) -> *const T
    {
        self.0 as usize as *const T
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
impl std::str::FromStr for Address
{
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16)?,
            None => s.replace('_', "").parse::<u64>()?,
        };
        Ok(Address(value))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_hex_and_decimal()
    {
        assert_eq!("0x1000".parse::<Address>().unwrap(), Address::new(0x1000));
        assert_eq!("0X1f".parse::<Address>().unwrap(), Address::new(0x1f));
        assert_eq!("4096".parse::<Address>().unwrap(), Address::new(4096));
        assert_eq!("0x1_0000".parse::<Address>().unwrap(), Address::new(0x10000));
        assert!("0xzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_alignment()
    {
        assert!(Address::new(0x1000).is_aligned(16));
        assert!(!Address::new(0x1004).is_aligned(8));
        assert!(Address::ZERO.is_null());
    }

    #[test]
    fn test_from_untyped_literal()
    {
        let addr = Address::from(0x1000);
        assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
        assert_eq!(u64::from(addr), 0x1000);
    }

    #[test]
    fn test_display_is_zero_padded()
    {
        assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    }
}
