//! Build script for dynadump-core
//!
//! Checks toolchain and platform requirements before compilation:
//! - Minimum Rust version (C string literals need Rust 1.77.0+)
//! - macOS version when building on a Mac
//!
//! ## Requirements
//!
//! - **Rust**: 1.77.0 or newer
//! - **macOS**: 10.13+ (High Sierra) for Intel, 11.0+ (Big Sur) for Apple Silicon
//! - **Other hosts**: build and test the portable modules only; the
//!   exception monitor reports itself unsupported at runtime

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::new(1, 77, 0);

        if rustc_version < min_rust_version {
            panic!(
                "dynadump-core requires Rust {} or newer (C string literals), found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        // If we can't get version (e.g., in some build environments), just warn
        println!("cargo:warning=could not verify Rust version");
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_os != "macos" {
        println!("cargo:warning=building dynadump-core for {target_os}: the exception monitor is unavailable");
        return;
    }

    // Apple Silicon shipped with Big Sur; dyld's shared-cache queries used by
    // image resolution need High Sierra on Intel.
    let min_macos_version = if target_arch == "aarch64" { (11, 0, 0) } else { (10, 13, 0) };
    check_macos_version(min_macos_version);
}

fn check_macos_version(min_macos_version: (u32, u32, u32))
{
    match get_macos_version() {
        Some(version) if version < min_macos_version => {
            panic!(
                "dynadump-core requires macOS {}.{}.{} or newer, found {}.{}.{}",
                min_macos_version.0, min_macos_version.1, min_macos_version.2, version.0, version.1, version.2
            );
        }
        Some(_) => {}
        None => {
            // Cross-compiling, or sw_vers is unavailable
            println!("cargo:warning=could not detect macOS version");
        }
    }
}

fn get_macos_version() -> Option<(u32, u32, u32)>
{
    use std::process::Command;

    let output = Command::new("sw_vers").arg("-productVersion").output().ok()?;

    let version_str = String::from_utf8(output.stdout).ok()?;
    let version_str = version_str.trim();

    // Parse version string (e.g., "14.2.1" or "11.0")
    let mut parts = version_str.split('.');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minor = parts.next()?.parse::<u32>().ok()?;
    let patch = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);

    Some((major, minor, patch))
}
