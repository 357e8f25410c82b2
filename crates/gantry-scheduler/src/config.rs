//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval agents are expected to ping at.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Upper bound on resolver calls in flight across all agents.
    #[serde(default = "default_max_concurrent_resolutions")]
    pub max_concurrent_resolutions: usize,
    /// How often stale health states are purged.
    #[serde(default = "default_health_sweep_interval")]
    pub health_sweep_interval_secs: u64,
    /// Resolver calls slower than this are logged as warnings.
    #[serde(default = "default_slow_resolve_threshold")]
    pub slow_resolve_threshold_ms: u64,
}

fn default_ping_interval() -> u64 {
    5
}

fn default_max_concurrent_resolutions() -> usize {
    32
}

fn default_health_sweep_interval() -> u64 {
    30
}

fn default_slow_resolve_threshold() -> u64 {
    1000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            max_concurrent_resolutions: default_max_concurrent_resolutions(),
            health_sweep_interval_secs: default_health_sweep_interval(),
            slow_resolve_threshold_ms: default_slow_resolve_threshold(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Agents silent for this long have lost contact. Always twice the ping interval.
    pub fn liveness_timeout(&self) -> Duration {
        self.ping_interval() * 2
    }

    pub fn health_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.health_sweep_interval_secs)
    }
}
