//! Test fixtures for creating sample data and scripted collaborators.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::console::ConsoleTarget;
use gantry_core::material::{
    ConfigurationProperty, Material, MaterialRevision, MaterialRevisions, Modification,
    PluggableScmMaterial, ScmKind, ScmMaterial,
};
use gantry_core::ports::{BuildAssignmentResolver, ConsoleSink};
use gantry_core::work::{BuildCause, BuildWork, Builder, JobPlan, Work};
use gantry_core::{AgentIdentifier, BuildId, Error, JobIdentifier, Result};
use gantry_scheduler::ConsoleLogWriter;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn agent(uuid: &str) -> AgentIdentifier {
    AgentIdentifier::new(format!("{}.example.com", uuid), "10.0.0.10", uuid)
}

pub fn job(pipeline: &str, counter: u32, stage: &str, name: &str) -> JobIdentifier {
    JobIdentifier {
        pipeline_name: pipeline.to_string(),
        pipeline_counter: counter,
        pipeline_label: counter.to_string(),
        stage_name: stage.to_string(),
        stage_counter: 1,
        build_name: name.to_string(),
        build_id: BuildId(i64::from(counter) * 100),
    }
}

pub fn git_revision(url: &str, name: &str, revision: &str) -> MaterialRevision {
    MaterialRevision::new(
        Material::Scm(ScmMaterial {
            kind: ScmKind::Git,
            url: url.to_string(),
            branch: None,
            folder: None,
            name: Some(name.to_string()),
        }),
        vec![Modification::new(revision, Utc::now())],
    )
}

pub fn pluggable_revision(
    plugin_id: &str,
    name: &str,
    folder: &str,
    revision: &str,
) -> MaterialRevision {
    MaterialRevision::new(
        Material::PluggableScm(PluggableScmMaterial {
            scm_id: format!("{}-scm", name),
            plugin_id: plugin_id.to_string(),
            name: name.to_string(),
            configuration: vec![ConfigurationProperty {
                key: "url".to_string(),
                value: format!("https://example.com/{}", name),
                secure: false,
            }],
            folder: Some(folder.to_string()),
        }),
        vec![Modification::new(revision, Utc::now())],
    )
}

pub fn build_work(
    job: JobIdentifier,
    revisions: Vec<MaterialRevision>,
    builders: Vec<Builder>,
) -> Work {
    Work::Build(BuildWork {
        job_plan: JobPlan {
            identifier: job,
            variables: Default::default(),
        },
        build_cause: BuildCause {
            material_revisions: MaterialRevisions::new(revisions),
            approver: None,
        },
        builders,
    })
}

pub fn shell(script: &str) -> Builder {
    Builder::new("sh", &["-c", script])
}

/// One scripted resolver answer.
pub enum Step {
    Work(Work),
    Fail(String),
    Panic,
    /// Wait for the gate to open, then hand out the work.
    Gated(Arc<Notify>, Work),
    Delay(Duration, Work),
}

/// Resolver that replays a per-agent script, then answers `NoWork`.
#[derive(Default)]
pub struct ScriptedResolver {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<AgentIdentifier>>,
}

impl ScriptedResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn then(&self, agent: &AgentIdentifier, step: Step) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent.uuid.clone())
            .or_default()
            .push_back(step);
        self
    }

    pub fn calls(&self) -> Vec<AgentIdentifier> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, agent: &AgentIdentifier) -> usize {
        self.calls().iter().filter(|a| *a == agent).count()
    }
}

#[async_trait]
impl BuildAssignmentResolver for ScriptedResolver {
    async fn resolve(&self, agent: &AgentIdentifier) -> Result<Work> {
        self.calls.lock().unwrap().push(agent.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&agent.uuid)
            .and_then(VecDeque::pop_front);

        match step {
            None => Ok(Work::NoWork),
            Some(Step::Work(work)) => Ok(work),
            Some(Step::Fail(reason)) => Err(Error::Internal(reason)),
            Some(Step::Panic) => panic!("scripted resolver panic"),
            Some(Step::Gated(gate, work)) => {
                gate.notified().await;
                Ok(work)
            }
            Some(Step::Delay(delay, work)) => {
                tokio::time::sleep(delay).await;
                Ok(work)
            }
        }
    }
}

/// Console sink keeping `(tag, line)` pairs.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl ConsoleSink for RecordingSink {
    fn std_output(&self, line: &str) {
        self.lines.lock().unwrap().push(("  ".to_string(), line.to_string()));
    }

    fn tagged_output(&self, tag: &str, line: &str) {
        self.lines.lock().unwrap().push((tag.to_string(), line.to_string()));
    }

    fn tagged_err_output(&self, tag: &str, line: &str) {
        self.lines.lock().unwrap().push((tag.to_string(), line.to_string()));
    }
}

/// Server-side console log that keeps rendered output per job locator.
#[derive(Default)]
pub struct CapturedConsoleLog {
    output: Mutex<HashMap<String, String>>,
}

impl CapturedConsoleLog {
    pub fn output(&self, job: &JobIdentifier) -> String {
        self.output
            .lock()
            .unwrap()
            .get(&job.build_locator())
            .cloned()
            .unwrap_or_default()
    }
}

impl ConsoleLogWriter for CapturedConsoleLog {
    fn append(&self, target: &ConsoleTarget, rendered: &str) {
        let key = match target {
            ConsoleTarget::Job(job) => job.build_locator(),
            ConsoleTarget::Build(id) => id.to_string(),
        };
        self.output
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_str(rendered);
    }
}
