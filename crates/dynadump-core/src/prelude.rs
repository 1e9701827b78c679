//! Common module for library exports

pub use crate::config::ProbeConfig;
pub use crate::error::{ProbeError, Result};
pub use crate::loader::{Dlopen, ImageHandle, ImageLoader};
pub use crate::probe::{cleanup, safe_load, LoadedImage, SafeLoader};
pub use crate::stepover::{add_stepover_address, StepoverRegistry};
pub use crate::types::{Address, FaultClass, FaultRecord};
