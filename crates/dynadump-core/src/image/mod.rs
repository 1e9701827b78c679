//! # Image Helpers
//!
//! Everything the probe needs to know about images that is not the probe
//! itself:
//!
//! - [`DyldCapabilities`]: optional dyld entry points, resolved once
//! - [`resolve_image`]: turn `Foundation` or `libobjc` into a loadable path
//! - [`loaded_images`]: images currently mapped into this process
//! - [`inspect_image`]: on-disk Mach-O summary via the `object` crate

mod dyld;
mod inspect;
mod resolve;

pub use dyld::{loaded_images, DyldCapabilities, LoadedImageInfo, UNKNOWN_INSTALL_NAME};
pub use inspect::{inspect_image, ImageSummary, SliceSummary};
pub use resolve::{candidate_paths, resolve_image, resolve_image_with};
