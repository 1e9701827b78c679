//! # Stepover Registry
//!
//! The set of addresses a caller has vouched for as "safe to skip past if
//! faulted on".
//!
//! The registry is written by the caller before a probe and read by the
//! exception receiver while the faulting thread is suspended. The suspended
//! thread might be holding any lock in the process (including the allocator's),
//! so lookups go through a lock-free skip list and never allocate once the
//! reading thread has pinned its epoch.
//!
//! Entries persist across probes until [`StepoverRegistry::clear`] is called.

use std::sync::Arc;

use crossbeam_skiplist::SkipSet;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::canonical::Canonicalizer;
use crate::types::Address;

/// Collection attempts made after `clear`.
const RECLAIM_ROUNDS: usize = 8;

static GLOBAL: Lazy<Arc<StepoverRegistry>> = Lazy::new(|| Arc::new(StepoverRegistry::new(Canonicalizer::native())));

/// Canonicalized set of stepover addresses.
#[derive(Debug)]
pub struct StepoverRegistry
{
    canonicalizer: Canonicalizer,
    addresses: SkipSet<u64>,
}

impl StepoverRegistry
{
    /// Create an empty registry that canonicalizes with `canonicalizer`.
    pub fn new(canonicalizer: Canonicalizer) -> Self
    {
        Self {
            canonicalizer,
            addresses: SkipSet::new(),
        }
    }

    /// The process-wide registry used by [`add_stepover_address`] and the
    /// default loader.
    pub fn global() -> Arc<StepoverRegistry>
    {
        Arc::clone(&GLOBAL)
    }

    /// Add `address`. Registering an address twice has no further effect.
    pub fn register(&self, address: Address)
    {
        let canonical = self.canonicalizer.canonicalize(address);
        self.addresses.insert(canonical.value());
        debug!(%canonical, "registered stepover address");
    }

    /// Returns `true` if the canonical form of `address` is registered.
    pub fn contains(&self, address: Address) -> bool
    {
        let canonical = self.canonicalizer.canonicalize(address);
        self.addresses.contains(&canonical.value())
    }

    /// Forget every registered address.
    ///
    /// Removed entries are freed by whichever thread next collects epoch
    /// garbage. They are pushed through here, on the caller's thread, so
    /// the exception receiver does not end up running `free`.
    pub fn clear(&self)
    {
        self.addresses.clear();
        for _ in 0..RECLAIM_ROUNDS {
            crossbeam_epoch::pin().flush();
        }
    }

    /// Number of distinct registered addresses.
    pub fn len(&self) -> usize
    {
        self.addresses.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool
    {
        self.addresses.is_empty()
    }

    /// Registered addresses in ascending order.
    pub fn addresses(&self) -> Vec<Address>
    {
        self.addresses.iter().map(|entry| Address::new(*entry.value())).collect()
    }

    /// Canonicalizer used for registration and lookup.
    pub fn canonicalizer(&self) -> Canonicalizer
    {
        self.canonicalizer
    }
}

impl Default for StepoverRegistry
{
    fn default() -> Self
    {
        Self::new(Canonicalizer::native())
    }
}

/// Register `address` with the process-wide stepover registry.
///
/// Call this before [`crate::probe::safe_load`] for every instruction (or
/// data address) that is known to fault harmlessly while the image loads.
pub fn add_stepover_address(address: Address)
{
    GLOBAL.register(address);
}
