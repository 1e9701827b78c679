//! # Types
//!
//! Platform-agnostic types shared by the probe components.

pub mod address;
pub mod fault;

// Re-export all public types
pub use address::Address;
pub use fault::{ExceptionContext, FaultClass, FaultRecord};
