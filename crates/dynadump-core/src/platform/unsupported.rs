//! Exception monitor for hosts without Mach exception ports.

use std::sync::Arc;

use tracing::debug;

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::monitor::MonitorState;
use crate::stepover::StepoverRegistry;
use crate::types::FaultRecord;

/// Never arms. [`ExceptionMonitor::install`] always fails with
/// [`ProbeError::Unsupported`].
pub struct ExceptionMonitor
{
    registry: Arc<StepoverRegistry>,
    config: ProbeConfig,
}

impl ExceptionMonitor
{
    pub fn new(registry: Arc<StepoverRegistry>, config: ProbeConfig) -> Self
    {
        Self { registry, config }
    }

    pub fn install(&mut self) -> Result<()>
    {
        debug!(
            registered = self.registry.len(),
            "exception monitor unavailable on this platform"
        );
        Err(ProbeError::Unsupported("exception ports require macOS"))
    }

    pub fn uninstall(&mut self) {}

    pub fn is_armed(&self) -> bool
    {
        false
    }

    pub fn state(&self) -> MonitorState
    {
        MonitorState::Idle
    }

    pub fn stepped_over(&self) -> Vec<FaultRecord>
    {
        Vec::new()
    }

    pub fn config(&self) -> &ProbeConfig
    {
        &self.config
    }
}
