//! Configuration types for the sandbox runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Workspace path inside the sandbox where project files are mounted.
    pub workspace: PathBuf,

    /// Timeout for runtime startup in seconds.
    pub startup_timeout_secs: u64,

    /// Interval between reachability probes for watched ports, in milliseconds.
    pub ready_probe_interval_ms: u64,

    /// Maximum number of reachability probes per watched port before giving up.
    pub ready_probe_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("/workspace"),
            startup_timeout_secs: 60,
            ready_probe_interval_ms: 500,
            ready_probe_attempts: 240,
        }
    }
}

impl RuntimeConfig {
    /// Get the startup timeout as a `Duration`.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Get the ready-probe interval as a `Duration`.
    pub fn ready_probe_interval(&self) -> Duration {
        Duration::from_millis(self.ready_probe_interval_ms)
    }
}
