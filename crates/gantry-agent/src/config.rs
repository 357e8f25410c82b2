//! Agent configuration.

use gantry_core::AgentIdentifier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable identity; generated when absent.
    #[serde(default = "default_uuid")]
    pub uuid: String,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Root under which each pipeline gets its own directory.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Delay before asking for work again after `NoWork` or a denial.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_millis: u64,
    /// How long to wait for an `Assign` after an `Idle` before asking again.
    #[serde(default = "default_assignment_timeout")]
    pub assignment_timeout_millis: u64,
    #[serde(default = "default_console_flush_interval")]
    pub console_flush_interval_millis: u64,
    #[serde(default = "default_console_batch_lines")]
    pub console_batch_lines: usize,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_ip_address() -> String {
    "127.0.0.1".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_subject_prefix() -> String {
    "gantry".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/var/lib/gantry/pipelines")
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_assignment_timeout() -> u64 {
    30_000
}

fn default_console_flush_interval() -> u64 {
    1000
}

fn default_console_batch_lines() -> usize {
    256
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            uuid: default_uuid(),
            hostname: default_hostname(),
            ip_address: default_ip_address(),
            nats_url: default_nats_url(),
            subject_prefix: default_subject_prefix(),
            working_dir: default_working_dir(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            poll_interval_millis: default_poll_interval(),
            assignment_timeout_millis: default_assignment_timeout(),
            console_flush_interval_millis: default_console_flush_interval(),
            console_batch_lines: default_console_batch_lines(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn identifier(&self) -> AgentIdentifier {
        AgentIdentifier::new(&self.hostname, &self.ip_address, &self.uuid)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    pub fn assignment_timeout(&self) -> Duration {
        Duration::from_millis(self.assignment_timeout_millis)
    }

    pub fn console_flush_interval(&self) -> Duration {
        Duration::from_millis(self.console_flush_interval_millis)
    }
}
