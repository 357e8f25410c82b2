//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Dispatch errors
    #[error("Work resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // Material errors
    #[error("Checkout of material '{material}' failed: {message}")]
    CheckoutFailed { material: String, message: String },

    #[error("Malformed revision: {0}")]
    MalformedRevision(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Plugin errors
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin execution failed: {0}")]
    PluginExecutionFailed(String),

    #[error("Plugin '{plugin_id}' timed out after {seconds} seconds")]
    PluginTimeout { plugin_id: String, seconds: u64 },

    // Infrastructure errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
