//! In-process SCM plugin host.

use crate::protocol::{CHECKOUT, CheckoutRequest, CheckoutResponse, SUCCESS_RESPONSE_CODE};
use crate::{PluginRequest, ScmPlugin};
use async_trait::async_trait;
use dashmap::DashMap;
use gantry_core::ports::{CheckoutResult, PropertyBag, ScmPluginCheckout, ScmRevisionDescriptor};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the plugin host.
#[derive(Debug, Clone)]
pub struct PluginHostConfig {
    /// Timeout for plugins without their own.
    pub default_timeout: Duration,
    pub plugin_timeouts: HashMap<String, Duration>,
}

impl Default for PluginHostConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300), // 5 minutes
            plugin_timeouts: HashMap::new(),
        }
    }
}

impl PluginHostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn plugin_timeout(mut self, plugin_id: impl Into<String>, timeout: Duration) -> Self {
        self.plugin_timeouts.insert(plugin_id.into(), timeout);
        self
    }

    pub fn timeout_for(&self, plugin_id: &str) -> Duration {
        self.plugin_timeouts
            .get(plugin_id)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Registered SCM plugins, keyed by plugin id.
///
/// Every call goes through the plugin's JSON request contract and is bounded
/// by the configured timeout.
pub struct ScmPluginRegistry {
    config: PluginHostConfig,
    plugins: DashMap<String, Arc<dyn ScmPlugin>>,
}

impl ScmPluginRegistry {
    pub fn new(config: PluginHostConfig) -> Self {
        Self {
            config,
            plugins: DashMap::new(),
        }
    }

    /// Register a plugin under its id, replacing any earlier one.
    pub fn register(&self, plugin: Arc<dyn ScmPlugin>) {
        let id = plugin.id().to_string();
        info!(plugin = %id, "Registering SCM plugin");
        self.plugins.insert(id, plugin);
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        self.plugins.remove(plugin_id).is_some()
    }

    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.plugins.contains_key(plugin_id)
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Send one request to a plugin and return the body of a successful response.
    pub async fn submit(&self, plugin_id: &str, request: PluginRequest) -> Result<String> {
        // Clone out of the map so no shard lock is held across the await.
        let plugin = self
            .plugins
            .get(plugin_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::PluginNotFound(plugin_id.to_string()))?;

        let timeout = self.config.timeout_for(plugin_id);
        debug!(plugin = %plugin_id, request = %request.name, "Submitting plugin request");

        let response = tokio::time::timeout(timeout, plugin.handle(request))
            .await
            .map_err(|_| {
                warn!(
                    plugin = %plugin_id,
                    timeout_secs = timeout.as_secs(),
                    "Plugin call timed out"
                );
                Error::PluginTimeout {
                    plugin_id: plugin_id.to_string(),
                    seconds: timeout.as_secs(),
                }
            })??;

        if response.code != SUCCESS_RESPONSE_CODE {
            return Err(Error::PluginExecutionFailed(format!(
                "plugin '{}' responded with code {}: {}",
                plugin_id, response.code, response.body
            )));
        }
        Ok(response.body)
    }
}

impl Default for ScmPluginRegistry {
    fn default() -> Self {
        Self::new(PluginHostConfig::default())
    }
}

#[async_trait]
impl ScmPluginCheckout for ScmPluginRegistry {
    async fn checkout(
        &self,
        plugin_id: &str,
        configuration: &PropertyBag,
        destination: &Path,
        revision: &ScmRevisionDescriptor,
    ) -> Result<CheckoutResult> {
        let body = CheckoutRequest::new(
            configuration,
            destination.to_string_lossy(),
            revision,
        )
        .to_json()?;

        let response = self
            .submit(plugin_id, PluginRequest::new(CHECKOUT, body))
            .await?;
        let result = CheckoutResult::from(CheckoutResponse::parse(&response)?);

        if result.success {
            info!(plugin = %plugin_id, revision = %revision.revision, "Plugin checkout succeeded");
        } else {
            warn!(plugin = %plugin_id, message = %result.message, "Plugin checkout failed");
        }
        Ok(result)
    }
}
