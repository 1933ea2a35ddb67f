use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shared client and service settings. Every field has a default so a partial
/// `settings.json` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenSettings {
    /// Token the liveness probe must return, compared byte for byte.
    pub ping_response: String,
    pub startup_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub save_queue_depth: usize,
    /// Catalog location, relative to the service's working directory unless absolute.
    pub catalog_file: PathBuf,
}

impl Default for WardenSettings {
    fn default() -> Self {
        Self {
            ping_response: "warden-service:ready".into(),
            startup_timeout_ms: 10_000,
            poll_interval_ms: 100,
            probe_timeout_ms: 1_000,
            request_timeout_ms: 300_000,
            shutdown_grace_ms: 1_000,
            save_queue_depth: 16,
            catalog_file: PathBuf::from("protectedPaths.json"),
        }
    }
}

impl WardenSettings {
    /// Missing file means defaults; a file that exists but does not parse is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&data)
            .map_err(|e| anyhow::anyhow!("invalid settings {}: {e}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.ping_response.trim().is_empty() {
            anyhow::bail!("ping_response cannot be empty");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        if self.save_queue_depth == 0 {
            anyhow::bail!("save_queue_depth must be at least 1");
        }
        Ok(())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
