//! Units of work an agent executes after an `Assign` frame.

use crate::checkout::MaterialCheckoutOrchestrator;
use crate::process::{ProcessExit, StreamTags, run_streaming};
use async_trait::async_trait;
use gantry_core::console::tags;
use gantry_core::label::PipelineLabel;
use gantry_core::ports::ConsoleSink;
use gantry_core::work::{BuildWork, Builder, JobResult, Work};
use gantry_core::{AgentIdentifier, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

pub type EnvironmentVariables = BTreeMap<String, String>;

const BUILD_TAGS: StreamTags = StreamTags {
    out: tags::OUT,
    err: tags::ERR,
};

/// Where the agent process lives, passed to `cancel` for diagnostics.
#[derive(Debug, Clone)]
pub struct AgentRuntimeInfo {
    pub identifier: AgentIdentifier,
    pub location: PathBuf,
}

/// Everything a unit needs from the agent while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub agent: AgentIdentifier,
    pub working_dir: PathBuf,
    pub console: Arc<dyn ConsoleSink>,
    pub checkout: Arc<MaterialCheckoutOrchestrator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed(JobResult),
    Cancelled,
}

impl WorkOutcome {
    pub fn job_result(&self) -> JobResult {
        match self {
            WorkOutcome::Completed(result) => *result,
            WorkOutcome::Cancelled => JobResult::Cancelled,
        }
    }
}

/// One assignment, executable once and cancellable from any task.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn execute(
        &self,
        env: &EnvironmentVariables,
        ctx: &ExecutionContext,
    ) -> Result<WorkOutcome>;

    fn cancel(&self, env: &EnvironmentVariables, runtime: &AgentRuntimeInfo);

    fn description(&self) -> String;
}

/// Wrap decoded work in the unit that knows how to run it.
pub fn unit_for(work: Work) -> Arc<dyn UnitOfWork> {
    match work {
        Work::Build(build) => Arc::new(BuildUnit::new(build)),
        Work::NoWork => Arc::new(NoWorkUnit::default()),
        Work::Denied { reason } => Arc::new(DeniedUnit::new(reason)),
        Work::Sleep { millis } => Arc::new(SleepUnit::new(Duration::from_millis(millis))),
    }
}

#[derive(Debug, Default)]
pub struct NoWorkUnit {
    cancel: CancellationToken,
}

#[async_trait]
impl UnitOfWork for NoWorkUnit {
    async fn execute(&self, _: &EnvironmentVariables, _: &ExecutionContext) -> Result<WorkOutcome> {
        Ok(WorkOutcome::Completed(JobResult::Passed))
    }

    fn cancel(&self, _: &EnvironmentVariables, _: &AgentRuntimeInfo) {
        self.cancel.cancel();
    }

    fn description(&self) -> String {
        "NoWork".to_string()
    }
}

#[derive(Debug)]
pub struct DeniedUnit {
    reason: String,
    cancel: CancellationToken,
}

impl DeniedUnit {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl UnitOfWork for DeniedUnit {
    async fn execute(
        &self,
        _: &EnvironmentVariables,
        ctx: &ExecutionContext,
    ) -> Result<WorkOutcome> {
        warn!(agent = %ctx.agent, reason = %self.reason, "Server denied work");
        Ok(WorkOutcome::Completed(JobResult::Passed))
    }

    fn cancel(&self, _: &EnvironmentVariables, _: &AgentRuntimeInfo) {
        self.cancel.cancel();
    }

    fn description(&self) -> String {
        format!("DeniedWork[{}]", self.reason)
    }
}

/// Waits out its duration unless cancelled first.
#[derive(Debug)]
pub struct SleepUnit {
    duration: Duration,
    cancel: CancellationToken,
}

impl SleepUnit {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl UnitOfWork for SleepUnit {
    async fn execute(&self, _: &EnvironmentVariables, _: &ExecutionContext) -> Result<WorkOutcome> {
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(WorkOutcome::Cancelled),
            _ = tokio::time::sleep(self.duration) => Ok(WorkOutcome::Completed(JobResult::Passed)),
        }
    }

    fn cancel(&self, _: &EnvironmentVariables, runtime: &AgentRuntimeInfo) {
        info!(agent = %runtime.identifier, "Cancelling sleep work");
        self.cancel.cancel();
    }

    fn description(&self) -> String {
        format!("SleepWork[{}ms]", self.duration.as_millis())
    }
}

/// Checks out the job's materials, then runs its builders in order.
pub struct BuildUnit {
    work: BuildWork,
    cancel: CancellationToken,
}

impl BuildUnit {
    pub fn new(work: BuildWork) -> Self {
        Self {
            work,
            cancel: CancellationToken::new(),
        }
    }

    pub fn work(&self) -> &BuildWork {
        &self.work
    }

    async fn run(&self, env: &EnvironmentVariables, ctx: &ExecutionContext) -> Result<WorkOutcome> {
        let job = self.work.identifier();
        let console = ctx.console.as_ref();
        let job_dir = ctx.working_dir.join(&job.pipeline_name);

        console.tagged_output(
            tags::NOTICE,
            &format!("Start to prepare {} on {}", job, ctx.agent),
        );
        tokio::fs::create_dir_all(&job_dir).await?;

        let revisions = &self.work.build_cause.material_revisions;
        let named = match revisions.named_revisions() {
            Ok(named) => named,
            Err(e) => {
                console.tagged_err_output(tags::PREP_ERR, &e.to_string());
                return Ok(self.finish(console, JobResult::Failed));
            }
        };

        let checkout = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(self.cancelled(console)),
            result = ctx.checkout.checkout_all(revisions, &job_dir, console, &self.cancel) => {
                result
            }
        };
        // A cancel-aware checkout fails once cancelled; that is not a job failure.
        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(console));
        }
        if checkout.is_err() {
            // Already reported on the console with the prep-error tag.
            return Ok(self.finish(console, JobResult::Failed));
        }

        let variables = self.environment(env, &named);
        for builder in &self.work.builders {
            match self.run_builder(builder, &variables, &named, &job_dir, console).await {
                BuilderOutcome::Passed => {}
                BuilderOutcome::Failed => return Ok(self.finish(console, JobResult::Failed)),
                BuilderOutcome::Cancelled => return Ok(self.cancelled(console)),
            }
        }

        Ok(self.finish(console, JobResult::Passed))
    }

    fn environment(
        &self,
        env: &EnvironmentVariables,
        named: &HashMap<String, String>,
    ) -> EnvironmentVariables {
        let job = self.work.identifier();
        let mut variables = env.clone();
        variables.extend(self.work.job_plan.variables.clone());
        variables.insert("GANTRY_PIPELINE_NAME".to_string(), job.pipeline_name.clone());
        variables.insert("GANTRY_PIPELINE_COUNTER".to_string(), job.pipeline_counter.to_string());
        variables.insert("GANTRY_PIPELINE_LABEL".to_string(), job.pipeline_label.clone());
        variables.insert("GANTRY_STAGE_NAME".to_string(), job.stage_name.clone());
        variables.insert("GANTRY_STAGE_COUNTER".to_string(), job.stage_counter.to_string());
        variables.insert("GANTRY_JOB_NAME".to_string(), job.build_name.clone());
        for (name, revision) in named {
            variables.insert(format!("GANTRY_REVISION_{}", env_name(name)), revision.clone());
        }
        variables
    }

    async fn run_builder(
        &self,
        builder: &Builder,
        variables: &EnvironmentVariables,
        named: &HashMap<String, String>,
        job_dir: &Path,
        console: &dyn ConsoleSink,
    ) -> BuilderOutcome {
        let job = self.work.identifier();
        let display = match &builder.description {
            Some(description) => PipelineLabel::new(description.as_str()).interpolate_with_env(
                u64::from(job.pipeline_counter),
                named,
                |name| variables.get(name).cloned(),
            ),
            None => builder.display(),
        };
        console.tagged_output(tags::TASK_START, &format!("Start to execute task: {}.", display));

        let cwd = match &builder.working_directory {
            Some(dir) => job_dir.join(dir),
            None => job_dir.to_path_buf(),
        };
        let mut command = Command::new(&builder.command);
        command.args(&builder.args).current_dir(cwd).envs(variables);

        let exit = run_streaming(command, console, BUILD_TAGS, &self.cancel).await;
        let exit = if self.cancel.is_cancelled() {
            Ok(ProcessExit::Cancelled)
        } else {
            exit
        };
        match exit {
            Ok(ProcessExit::Exited(0)) => {
                console.tagged_output(tags::TASK_PASS, &format!("Task: {} passed.", display));
                BuilderOutcome::Passed
            }
            Ok(ProcessExit::Exited(code)) => {
                console.tagged_output(
                    tags::TASK_FAIL,
                    &format!("Task: {} failed with exit code {}.", display, code),
                );
                BuilderOutcome::Failed
            }
            Ok(ProcessExit::Cancelled) => {
                let line = format!("Task: {} cancelled.", display);
                console.tagged_output(tags::TASK_CANCELLED, &line);
                BuilderOutcome::Cancelled
            }
            Err(e) => {
                console.tagged_output(
                    tags::TASK_FAIL,
                    &format!("Task: {} could not be started: {}", display, e),
                );
                BuilderOutcome::Failed
            }
        }
    }

    fn cancelled(&self, console: &dyn ConsoleSink) -> WorkOutcome {
        console.tagged_output(
            tags::JOB_FAIL,
            &format!("Job {} cancelled.", self.work.identifier()),
        );
        WorkOutcome::Cancelled
    }

    fn finish(&self, console: &dyn ConsoleSink, result: JobResult) -> WorkOutcome {
        let job = self.work.identifier();
        match result {
            JobResult::Passed => {
                console.tagged_output(tags::JOB_PASS, &format!("Job {} passed.", job));
            }
            _ => {
                console.tagged_output(tags::JOB_FAIL, &format!("Job {} failed.", job));
            }
        }
        WorkOutcome::Completed(result)
    }
}

enum BuilderOutcome {
    Passed,
    Failed,
    Cancelled,
}

/// Upper-cased, with anything outside `[A-Z0-9_]` replaced by `_`.
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| match c.to_ascii_uppercase() {
            c @ ('A'..='Z' | '0'..='9' | '_') => c,
            _ => '_',
        })
        .collect()
}

#[async_trait]
impl UnitOfWork for BuildUnit {
    async fn execute(
        &self,
        env: &EnvironmentVariables,
        ctx: &ExecutionContext,
    ) -> Result<WorkOutcome> {
        let span = gantry_trace::job_span(self.work.identifier());
        let outcome = self.run(env, ctx).instrument(span).await?;
        info!(
            job = %self.work.identifier(),
            result = ?outcome.job_result(),
            "Build finished"
        );
        Ok(outcome)
    }

    fn cancel(&self, _: &EnvironmentVariables, runtime: &AgentRuntimeInfo) {
        info!(
            job = %self.work.identifier(),
            agent = %runtime.identifier,
            location = %runtime.location.display(),
            "Cancelling build"
        );
        self.cancel.cancel();
    }

    fn description(&self) -> String {
        format!("BuildWork[{}]", self.work.identifier())
    }
}
