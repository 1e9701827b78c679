//! Image identifier resolution.

use std::path::Path;

use tracing::debug;

use super::DyldCapabilities;
use crate::error::{ProbeError, Result};

/// Paths tried, in order, for a bare image name.
///
/// ```rust
/// use dynadump_core::image::candidate_paths;
///
/// assert_eq!(candidate_paths("Foundation")[0], "/System/Library/Frameworks/Foundation.framework/Foundation");
/// ```
pub fn candidate_paths(name: &str) -> Vec<String>
{
    if let Some(stem) = name.strip_suffix(".dylib") {
        return vec![format!("/usr/lib/{stem}.dylib")];
    }

    let mut candidates = vec![
        format!("/System/Library/Frameworks/{name}.framework/{name}"),
        format!("/System/Library/PrivateFrameworks/{name}.framework/{name}"),
        format!("/usr/lib/{name}.dylib"),
    ];
    if !name.starts_with("lib") {
        candidates.push(format!("/usr/lib/lib{name}.dylib"));
    }
    candidates
}

/// Resolve `identifier` to something `dlopen` can take.
///
/// Identifiers containing `/` are returned unchanged. Bare names are
/// expanded with [`candidate_paths`] and the first candidate that exists on
/// disk or in the dyld shared cache wins.
///
/// ## Errors
///
/// - `InvalidArgument`: empty identifier
/// - `Image`: no candidate exists
pub fn resolve_image(identifier: &str) -> Result<String>
{
    let capabilities = DyldCapabilities::get();
    resolve_image_with(identifier, |path| {
        Path::new(path).exists() || capabilities.shared_cache_contains(path)
    })
}

/// [`resolve_image`] with a caller-supplied existence check.
pub fn resolve_image_with(identifier: &str, exists: impl Fn(&str) -> bool) -> Result<String>
{
    if identifier.is_empty() {
        return Err(ProbeError::InvalidArgument("empty image identifier".to_string()));
    }
    if identifier.contains('/') {
        return Ok(identifier.to_string());
    }

    let candidates = candidate_paths(identifier);
    for candidate in &candidates {
        if exists(candidate) {
            debug!(identifier, resolved = %candidate, "resolved image identifier");
            return Ok(candidate.clone());
        }
    }
    Err(ProbeError::Image(format!(
        "could not resolve {identifier:?} (tried {})",
        candidates.join(", ")
    )))
}
