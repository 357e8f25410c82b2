//! Strongly-typed identifiers for agents, jobs and protocol frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Acknowledgement id carried by every [`crate::message::Message`].
///
/// Only [`AckId::generate`] creates new ids; there is no constructor taking
/// caller input, so two envelopes never share an id by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckId(Uuid);

impl AckId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ack_{}", self.0)
    }
}

/// Identity of a worker agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentIdentifier {
    pub hostname: String,
    pub ip_address: String,
    pub uuid: String,
}

impl AgentIdentifier {
    pub fn new(
        hostname: impl Into<String>,
        ip_address: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address: ip_address.into(),
            uuid: uuid.into(),
        }
    }
}

impl fmt::Display for AgentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.hostname, self.ip_address, self.uuid)
    }
}

/// Server-side database id of a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub i64);

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully-qualified identity of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIdentifier {
    pub pipeline_name: String,
    pub pipeline_counter: u32,
    pub pipeline_label: String,
    pub stage_name: String,
    pub stage_counter: u32,
    pub build_name: String,
    pub build_id: BuildId,
}

impl JobIdentifier {
    /// Path-like locator: `pipeline/counter/stage/stageCounter/job`.
    pub fn build_locator(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.pipeline_name,
            self.pipeline_counter,
            self.stage_name,
            self.stage_counter,
            self.build_name
        )
    }
}

impl fmt::Display for JobIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build_locator())
    }
}
