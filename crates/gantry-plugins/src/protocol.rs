//! JSON bodies exchanged with SCM plugins.

use chrono::SecondsFormat;
use gantry_core::ports::{CheckoutResult, PropertyBag, ScmRevisionDescriptor};
use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request name for a checkout call.
pub const CHECKOUT: &str = "checkout";

/// Response code of a handled request.
pub const SUCCESS_RESPONSE_CODE: u16 = 200;

/// One configuration value as plugins expect it: `{"value": ".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPayload {
    pub revision: String,
    /// UTC, millisecond precision: `2011-07-13T19:43:37.100Z`.
    pub timestamp: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Body of a `checkout` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CheckoutRequest {
    pub scm_configuration: BTreeMap<String, ConfigValue>,
    pub destination_folder: String,
    pub revision: RevisionPayload,
}

impl CheckoutRequest {
    pub fn new(
        configuration: &PropertyBag,
        destination_folder: impl Into<String>,
        revision: &ScmRevisionDescriptor,
    ) -> Self {
        Self {
            scm_configuration: configuration
                .iter()
                .map(|(k, v)| (k.to_string(), ConfigValue { value: v.to_string() }))
                .collect(),
            destination_folder: destination_folder.into(),
            revision: RevisionPayload {
                revision: revision.revision.clone(),
                timestamp: revision.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                data: revision.data.clone(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Body of a `checkout` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl CheckoutResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            messages: vec![message.into()],
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Failure,
            messages: vec![message.into()],
        }
    }

    pub fn parse(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Err(Error::PluginExecutionFailed(
                "Unable to de-serialize json response. Empty response body".to_string(),
            ));
        }
        serde_json::from_str(body).map_err(|e| {
            Error::PluginExecutionFailed(format!("Unable to de-serialize json response. {}", e))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<CheckoutResponse> for CheckoutResult {
    fn from(response: CheckoutResponse) -> Self {
        let message = response.messages.join("\n");
        match response.status {
            ResponseStatus::Success => CheckoutResult::success(message),
            ResponseStatus::Failure => CheckoutResult::failure(message),
        }
    }
}
