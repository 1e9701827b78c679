//! # dynadump-core
//!
//! Crash-resilient dynamic library probing and loaded-image introspection
//! for Darwin.
//!
//! This crate provides:
//! - A Mach exception monitor that steps a thread past faults at
//!   caller-registered addresses
//! - [`safe_load`]: `dlopen` under that monitor, with a frame-pointer
//!   backtrace logged for any fault that cannot be stepped over
//! - Image helpers: identifier resolution, loaded-image listing, on-disk
//!   Mach-O summaries
//!
//! ```rust,no_run
//! use dynadump_core::{add_stepover_address, safe_load, Address};
//!
//! add_stepover_address(Address::new(0x1_8000_4000));
//! let image = safe_load("/System/Library/Frameworks/Foundation.framework/Foundation")?;
//! for fault in &image.stepped_over {
//!     println!("stepped over {fault}");
//! }
//! # Ok::<(), dynadump_core::ProbeError>(())
//! ```
//!
//! ## Platform Support
//!
//! - **macOS** (aarch64, x86_64): everything. Stepping over faults needs a
//!   fixed instruction width and is only available on aarch64.
//! - **Other hosts**: the portable pieces build and run; arming the monitor
//!   fails with a setup error, so `safe_load` never calls the loader.
//!
//! ## Why unsafe code is needed
//!
//! The monitor talks to the kernel through Mach ports and rewrites the
//! registers of a suspended thread. We wrap these calls in safe
//! abstractions, but the underlying system calls themselves are `unsafe`.

#![allow(unsafe_code)] // Required for Mach exception ports and dyld queries

pub mod canonical;
pub mod config;
pub mod error;
pub mod image;
pub mod loader;
pub mod monitor;
pub mod platform;
pub mod prelude;
pub mod probe;
pub mod report;
pub mod stepover;
pub mod types;
pub mod unwind;

pub use error::{ProbeError, Result};
pub use monitor::live_monitor_count;
pub use probe::{cleanup, safe_load, LoadedImage, SafeLoader};
pub use stepover::add_stepover_address;
pub use types::{Address, FaultClass, FaultRecord};
