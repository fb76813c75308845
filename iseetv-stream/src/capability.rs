//! Hardware-accelerated encoding detection.

use async_trait::async_trait;
use iseetv_core::ChannelId;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cache::ChannelCache;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Whether the hardware encoder path works on this machine.
    async fn hardware_available(&self) -> bool;
}

/// Runs a detection command; exit code 0 means hardware encoding works.
#[derive(Debug, Clone)]
pub struct CommandCapabilityProbe {
    argv: Vec<String>,
}

impl CommandCapabilityProbe {
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl CapabilityProbe for CommandCapabilityProbe {
    async fn hardware_available(&self) -> bool {
        let Some((program, args)) = self.argv.split_first() else {
            return false;
        };

        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(program = %program, "Hardware detection tool not installed");
                false
            }
            Err(e) => {
                warn!(program = %program, "Hardware detection failed to run: {e}");
                false
            }
        }
    }
}

/// Memoizes hardware availability per channel.
pub struct HardwareCapabilityDetector {
    probe: Arc<dyn CapabilityProbe>,
    cache: ChannelCache<bool>,
}

impl HardwareCapabilityDetector {
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            probe,
            cache: ChannelCache::new(),
        }
    }

    /// Never fails: a missing or broken tool reads as "not available".
    pub async fn detect(&self, channel_id: &ChannelId) -> bool {
        if let Some(available) = self.cache.get(channel_id) {
            return available;
        }

        let available = self.probe.hardware_available().await;
        info!(channel_id = %channel_id, available, "Hardware encoding capability detected");
        self.cache.put(channel_id.clone(), available);
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detect_memoized_per_channel() {
        let mut probe = MockCapabilityProbe::new();
        // one run per distinct channel
        probe.expect_hardware_available().times(2).returning(|| true);
        let detector = HardwareCapabilityDetector::new(Arc::new(probe));

        assert!(detector.detect(&ChannelId::from(1)).await);
        assert!(detector.detect(&ChannelId::from(1)).await);
        assert!(detector.detect(&ChannelId::from(2)).await);
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let probe = CommandCapabilityProbe::new(vec!["/nonexistent/vainfo".to_string()]);
        assert!(!probe.hardware_available().await);
    }

    #[tokio::test]
    async fn test_empty_command_is_unavailable() {
        assert!(!CommandCapabilityProbe::new(Vec::new()).hardware_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_decides() {
        assert!(CommandCapabilityProbe::new(vec!["true".to_string()]).hardware_available().await);
        assert!(!CommandCapabilityProbe::new(vec!["false".to_string()]).hardware_available().await);
    }
}
