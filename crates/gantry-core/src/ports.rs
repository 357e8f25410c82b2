//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the dispatch core and the
//! collaborators it is wired to at startup: the job-selection algorithm, the
//! live configuration, the console, the transport and SCM plugins.

use crate::ids::AgentIdentifier;
use crate::message::Message;
use crate::work::Work;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Decides which job, if any, an idle agent runs next.
///
/// Implementations may block on pipeline and job locks.
#[async_trait]
pub trait BuildAssignmentResolver: Send + Sync {
    async fn resolve(&self, agent: &AgentIdentifier) -> Result<Work>;
}

/// Read-only view of the current pipeline topology.
pub trait ConfigSnapshot: Send + Sync {
    fn has_pipeline(&self, pipeline: &str) -> bool;

    fn has_stage(&self, pipeline: &str, stage: &str) -> bool;

    fn has_job(&self, pipeline: &str, stage: &str, job: &str) -> bool;

    /// Whether any pipeline is configured with a material of this fingerprint.
    fn has_material(&self, fingerprint: &str) -> bool;
}

/// Destination for a job's console output.
pub trait ConsoleSink: Send + Sync {
    fn std_output(&self, line: &str);

    fn tagged_output(&self, tag: &str, line: &str);

    fn tagged_err_output(&self, tag: &str, line: &str);
}

/// Outbound frames to a connected agent.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, agent: &AgentIdentifier, message: Message) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Assigned,
    NoWork,
    Denied,
    Failed,
}

/// Wall-clock bounds of one resolver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveTiming {
    pub agent: AgentIdentifier,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: ResolveOutcome,
}

impl ResolveTiming {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

pub trait PerformanceLogger: Send + Sync {
    fn record(&self, timing: ResolveTiming);
}

/// Plugin configuration handed to a checkout call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, String>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Revision a plugin should check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScmRevisionDescriptor {
    pub revision: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl CheckoutResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Checkout capability of SCM plugins.
#[async_trait]
pub trait ScmPluginCheckout: Send + Sync {
    async fn checkout(
        &self,
        plugin_id: &str,
        configuration: &PropertyBag,
        destination: &Path,
        revision: &ScmRevisionDescriptor,
    ) -> Result<CheckoutResult>;
}
