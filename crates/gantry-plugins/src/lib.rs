//! SCM plugin host for Gantry.
//!
//! Plugins receive named requests with JSON bodies and answer with a response
//! code and a JSON body. [`ScmPluginRegistry`] adapts this to the agent's
//! checkout port.

pub mod host;
pub mod protocol;

pub use host::{PluginHostConfig, ScmPluginRegistry};
pub use protocol::{CheckoutRequest, CheckoutResponse};

use async_trait::async_trait;
use gantry_core::Result;

/// A named request with a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    pub name: String,
    pub body: String,
}

impl PluginRequest {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginResponse {
    pub code: u16,
    pub body: String,
}

impl PluginResponse {
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(protocol::SUCCESS_RESPONSE_CODE, body)
    }
}

/// An SCM plugin loaded into the agent process.
#[async_trait]
pub trait ScmPlugin: Send + Sync {
    fn id(&self) -> &str;

    async fn handle(&self, request: PluginRequest) -> Result<PluginResponse>;
}
