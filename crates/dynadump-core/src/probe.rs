//! # Safe Load Orchestrator
//!
//! Runs a dynamic load under an armed exception monitor.
//!
//! The sequence is always the same:
//!
//! 1. arm the monitor on the calling thread (a failure here means the
//!    loader is never called)
//! 2. call the loader
//! 3. tear the monitor down, whatever the loader did
//!
//! Faults at registered stepover addresses are skipped while the loader
//! runs and reported back in [`LoadedImage::stepped_over`]. Any other fault
//! ends the process after the monitor has logged a backtrace.

use std::ffi::CString;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::loader::{Dlopen, ImageHandle, ImageLoader};
use crate::platform::ExceptionMonitor;
use crate::stepover::StepoverRegistry;
use crate::types::FaultRecord;

static DEFAULT_LOADER: Lazy<Mutex<SafeLoader<Dlopen>>> = Lazy::new(|| Mutex::new(SafeLoader::new(Dlopen::default())));

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage
{
    /// Handle returned by the loader.
    pub handle: ImageHandle,
    /// Faults that were stepped over during the load, oldest first.
    pub stepped_over: Vec<FaultRecord>,
}

/// Runs an [`ImageLoader`] with the exception monitor armed.
///
/// ```rust,no_run
/// use dynadump_core::loader::Dlopen;
/// use dynadump_core::probe::SafeLoader;
///
/// let mut loader = SafeLoader::new(Dlopen::default());
/// let image = loader.safe_load("/usr/lib/libobjc.A.dylib")?;
/// println!("loaded with {} stepped-over faults", image.stepped_over.len());
/// # Ok::<(), dynadump_core::error::ProbeError>(())
/// ```
pub struct SafeLoader<L>
{
    loader: L,
    registry: Arc<StepoverRegistry>,
    config: ProbeConfig,
    monitor: Option<ExceptionMonitor>,
}

impl<L: ImageLoader> SafeLoader<L>
{
    /// Orchestrator over `loader` using the process-wide stepover registry
    /// and the default configuration.
    pub fn new(loader: L) -> Self
    {
        Self {
            loader,
            registry: StepoverRegistry::global(),
            config: ProbeConfig::default(),
            monitor: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<StepoverRegistry>) -> Self
    {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ProbeConfig) -> Self
    {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<StepoverRegistry>
    {
        &self.registry
    }

    pub fn config(&self) -> &ProbeConfig
    {
        &self.config
    }

    /// Load `identifier` with the monitor armed on the calling thread.
    ///
    /// ## Errors
    ///
    /// - `InvalidArgument`: `identifier` contains a NUL byte
    /// - `Setup`: the monitor could not be armed; the loader was not called
    /// - `LoadFailed`: the loader reported failure; carries the last
    ///   stepped-over fault, if any
    ///
    /// The monitor is torn down before this returns, on every path.
    pub fn safe_load(&mut self, identifier: &str) -> Result<LoadedImage>
    {
        let image = CString::new(identifier)
            .map_err(|_| ProbeError::InvalidArgument(format!("image identifier contains a NUL byte: {identifier:?}")))?;

        // Stale monitor from an interrupted probe.
        self.cleanup();

        let mut monitor = ExceptionMonitor::new(Arc::clone(&self.registry), self.config);
        monitor.install().map_err(into_setup_error)?;
        debug!(image = identifier, stepovers = self.registry.len(), "probing image");

        let armed = ArmedMonitor(self.monitor.insert(monitor));
        let outcome = self.loader.load(&image);
        let stepped_over = armed.0.stepped_over();
        drop(armed);
        self.cleanup();

        match outcome {
            Ok(handle) => {
                info!(image = identifier, stepped_over = stepped_over.len(), "image loaded");
                Ok(LoadedImage { handle, stepped_over })
            }
            Err(reason) => {
                warn!(image = identifier, %reason, "image failed to load");
                Err(ProbeError::LoadFailed {
                    reason,
                    fault: stepped_over.last().copied(),
                })
            }
        }
    }
}

impl<L> SafeLoader<L>
{
    /// Tear down any monitor this orchestrator still has armed.
    ///
    /// `safe_load` already does this on return, so the call only matters
    /// after a panic escaped the loader. Calling it again is a no-op.
    pub fn cleanup(&mut self)
    {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.uninstall();
        }
    }
}

impl<L> Drop for SafeLoader<L>
{
    fn drop(&mut self)
    {
        self.cleanup();
    }
}

/// Disarms the monitor if the loader unwinds.
struct ArmedMonitor<'a>(&'a mut ExceptionMonitor);

impl Drop for ArmedMonitor<'_>
{
    fn drop(&mut self)
    {
        self.0.uninstall();
    }
}

fn into_setup_error(err: ProbeError) -> ProbeError
{
    match err {
        ProbeError::Setup(_) => err,
        other => ProbeError::Setup(other.to_string()),
    }
}

/// Load `image_identifier` with `dlopen` under the process-default
/// orchestrator and the process-wide stepover registry.
///
/// See [`SafeLoader::safe_load`] for the error contract.
pub fn safe_load(image_identifier: &str) -> Result<LoadedImage>
{
    DEFAULT_LOADER
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .safe_load(image_identifier)
}

/// Tear down the process-default orchestrator's monitor if one is armed.
pub fn cleanup()
{
    DEFAULT_LOADER.lock().unwrap_or_else(PoisonError::into_inner).cleanup();
}

#[cfg(test)]
mod tests
{
    use std::cell::Cell;
    use std::ffi::CStr;

    use super::*;
    use crate::canonical::Canonicalizer;

    fn private_registry() -> Arc<StepoverRegistry>
    {
        Arc::new(StepoverRegistry::new(Canonicalizer::Plain))
    }

    #[test]
    fn test_nul_in_identifier_is_rejected_before_loading()
    {
        let calls = Cell::new(0);
        let loader = |_: &CStr| {
            calls.set(calls.get() + 1);
            Err::<ImageHandle, String>("unreachable".to_string())
        };
        let mut probe = SafeLoader::new(loader).with_registry(private_registry());

        let err = probe.safe_load("lib\0objc").unwrap_err();
        assert!(matches!(err, ProbeError::InvalidArgument(_)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_setup_errors_are_reported_as_setup()
    {
        let err = into_setup_error(ProbeError::Unsupported("nope"));
        assert!(matches!(err, ProbeError::Setup(message) if message.contains("nope")));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_kernel_errors_are_reported_as_setup()
    {
        use crate::platform::macos::error::MachError;

        let err = ProbeError::from(MachError::NoSpace);
        assert!(err.is_setup_failure());
        let err = into_setup_error(err);
        assert!(matches!(err, ProbeError::Setup(message) if message.contains("KERN_NO_SPACE")));
    }

    #[test]
    fn test_cleanup_without_probe_is_noop()
    {
        let mut probe = SafeLoader::new(Dlopen::default()).with_registry(private_registry());
        probe.cleanup();
        probe.cleanup();
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_loader_never_runs_without_monitor()
    {
        let calls = Cell::new(0);
        let loader = |_: &CStr| {
            calls.set(calls.get() + 1);
            Err::<ImageHandle, String>("unreachable".to_string())
        };
        let mut probe = SafeLoader::new(loader).with_registry(private_registry());

        let err = probe.safe_load("libanything.dylib").unwrap_err();
        assert!(matches!(err, ProbeError::Setup(_)));
        assert_eq!(calls.get(), 0);
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn test_loader_failure_is_reported()
    {
        let loader = |_: &CStr| Err::<ImageHandle, String>("image not found".to_string());
        let mut probe = SafeLoader::new(loader).with_registry(private_registry());

        match probe.safe_load("libmissing.dylib") {
            Err(ProbeError::LoadFailed { reason, fault }) => {
                assert_eq!(reason, "image not found");
                assert!(fault.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
