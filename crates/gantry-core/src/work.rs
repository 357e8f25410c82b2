//! Work handed to an agent in an `Assign` frame.

use crate::ids::JobIdentifier;
use crate::material::MaterialRevisions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Work {
    Build(BuildWork),
    NoWork,
    /// Agent is disabled or unknown to the server.
    Denied { reason: String },
    /// Smoke-test work: wait, then report completion.
    Sleep { millis: u64 },
}

impl Work {
    pub fn description(&self) -> String {
        match self {
            Work::Build(build) => format!("BuildWork[{}]", build.job_plan.identifier),
            Work::NoWork => "NoWork".to_string(),
            Work::Denied { reason } => format!("DeniedWork[{}]", reason),
            Work::Sleep { millis } => format!("SleepWork[{}ms]", millis),
        }
    }

    pub fn is_build(&self) -> bool {
        matches!(self, Work::Build(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildWork {
    pub job_plan: JobPlan,
    pub build_cause: BuildCause,
    #[serde(default)]
    pub builders: Vec<Builder>,
}

impl BuildWork {
    pub fn identifier(&self) -> &JobIdentifier {
        &self.job_plan.identifier
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPlan {
    pub identifier: JobIdentifier,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Why the job was scheduled, and against which revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCause {
    pub material_revisions: MaterialRevisions,
    #[serde(default)]
    pub approver: Option<String>,
}

/// Final state of a job as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Passed,
    Failed,
    Cancelled,
}

/// Payload of `ReportCompleting` and `ReportCompleted` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub identifier: JobIdentifier,
    pub result: JobResult,
}

/// One build step, run as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relative to the job working directory.
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Builder {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            working_directory: None,
            description: None,
        }
    }

    pub fn display(&self) -> String {
        self.description.clone().unwrap_or_else(|| {
            std::iter::once(self.command.as_str())
                .chain(self.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}
