//! Configuration for the NATS transport.

use std::time::Duration;

/// Configuration for the NATS transport.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URLs (several for a cluster).
    pub urls: Vec<String>,
    /// First token of every subject, so several installations can share a server.
    pub subject_prefix: String,
    /// Maximum reconnection attempts; `None` retries forever.
    pub max_reconnect_attempts: Option<usize>,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    /// Frames buffered per subscription before the reader waits.
    pub inbox_capacity: usize,
    pub client_name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: vec!["nats://localhost:4222".to_string()],
            subject_prefix: "gantry".to_string(),
            max_reconnect_attempts: None,
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
            inbox_capacity: 256,
            client_name: None,
        }
    }
}

impl NatsConfig {
    /// Create a new config with a single URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Set multiple server URLs for cluster support.
    pub fn with_urls(mut self, urls: Vec<String>) -> Self {
        self.urls = urls;
        self
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    pub fn with_max_reconnects(mut self, max: usize) -> Self {
        self.max_reconnect_attempts = Some(max);
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = NatsConfig::new("nats://10.0.0.1:4222")
            .with_subject_prefix("ci")
            .with_max_reconnects(5)
            .with_inbox_capacity(0)
            .with_client_name("server-1");

        assert_eq!(config.urls, vec!["nats://10.0.0.1:4222".to_string()]);
        assert_eq!(config.subject_prefix, "ci");
        assert_eq!(config.max_reconnect_attempts, Some(5));
        assert_eq!(config.inbox_capacity, 1);
        assert_eq!(config.client_name.as_deref(), Some("server-1"));
    }
}
