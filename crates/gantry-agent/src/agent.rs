//! The agent poll loop: idle, assignment, execution, report, idle again.

use crate::checkout::MaterialCheckoutOrchestrator;
use crate::config::AgentConfig;
use crate::console::{ConsoleChannel, ConsolePublisher};
use crate::heartbeat::HeartbeatService;
use crate::work::{
    AgentRuntimeInfo, EnvironmentVariables, ExecutionContext, UnitOfWork, WorkOutcome, unit_for,
};
use gantry_core::console::ConsoleTarget;
use gantry_core::message::{Action, Message};
use gantry_core::ports::{ConsoleSink, MessagePublisher};
use gantry_core::work::{JobReport, JobResult, Work};
use gantry_core::{AgentIdentifier, JobIdentifier, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// What happens once the current unit finishes.
enum FollowUp {
    /// Flush the job console, report completion, then ask for more work.
    Report {
        job: JobIdentifier,
        console: JoinHandle<()>,
    },
    Idle,
    Repoll,
}

struct Running {
    unit: Arc<dyn UnitOfWork>,
    handle: JoinHandle<Result<WorkOutcome>>,
    follow_up: FollowUp,
}

/// Console for work that has no job log; lines go to the agent's own log.
struct AgentLogConsole;

impl ConsoleSink for AgentLogConsole {
    fn std_output(&self, line: &str) {
        debug!(line, "Console output");
    }

    fn tagged_output(&self, tag: &str, line: &str) {
        debug!(tag, line, "Console output");
    }

    fn tagged_err_output(&self, tag: &str, line: &str) {
        debug!(tag, line, "Console error output");
    }
}

/// Drives one agent against the server.
///
/// Frames from the server arrive on an inbox channel fed by the transport;
/// frames to the server go through the [`MessagePublisher`]. At most one
/// unit of work runs at a time.
pub struct AgentController {
    config: AgentConfig,
    agent: AgentIdentifier,
    publisher: Arc<dyn MessagePublisher>,
    checkout: Arc<MaterialCheckoutOrchestrator>,
    environment: EnvironmentVariables,
}

impl AgentController {
    pub fn new(
        config: AgentConfig,
        publisher: Arc<dyn MessagePublisher>,
        checkout: Arc<MaterialCheckoutOrchestrator>,
    ) -> Self {
        let agent = config.identifier();
        Self {
            config,
            agent,
            publisher,
            checkout,
            environment: EnvironmentVariables::new(),
        }
    }

    /// Variables every build step inherits, below job-level ones.
    pub fn with_environment(mut self, environment: EnvironmentVariables) -> Self {
        self.environment = environment;
        self
    }

    pub fn identifier(&self) -> &AgentIdentifier {
        &self.agent
    }

    /// Run until `shutdown` fires or the inbox closes.
    ///
    /// A unit still running at shutdown is cancelled and awaited.
    pub async fn run(
        self,
        mut inbox: mpsc::Receiver<Message>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let span = gantry_trace::agent_span(&self.agent, "run");
        async move {
            info!(agent = %self.agent, "Starting agent");
            self.register().await;

            let heartbeat_stop = shutdown.child_token();
            let heartbeat = HeartbeatService::new(
                self.agent.clone(),
                Arc::clone(&self.publisher),
                self.config.heartbeat_interval(),
            );
            let heartbeat_token = heartbeat_stop.clone();
            let heartbeat_task = tokio::spawn(async move { heartbeat.run(heartbeat_token).await });

            let mut running: Option<Running> = None;
            // Always armed while idle, so a lost frame only delays the next request.
            let mut repoll_at: Option<Instant> = Some(self.request_work().await);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    frame = inbox.recv() => match frame {
                        Some(message) => {
                            self.handle_frame(message, &mut running, &mut repoll_at).await
                        }
                        None => {
                            info!(agent = %self.agent, "Inbox closed");
                            break;
                        }
                    },
                    finished = join(&mut running) => {
                        if let Some(done) = running.take() {
                            repoll_at = Some(self.complete(done.follow_up, finished).await);
                        }
                    }
                    _ = wait_until(repoll_at) => {
                        repoll_at = Some(self.request_work().await);
                    }
                }
            }

            if let Some(current) = running.take() {
                info!(
                    agent = %self.agent,
                    work = %current.unit.description(),
                    "Cancelling work for shutdown"
                );
                current.unit.cancel(&self.environment, &self.runtime_info());
                let _ = current.handle.await;
            }
            heartbeat_stop.cancel();
            let _ = heartbeat_task.await;

            info!(agent = %self.agent, "Agent stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn handle_frame(
        &self,
        message: Message,
        running: &mut Option<Running>,
        repoll_at: &mut Option<Instant>,
    ) {
        match message.action() {
            Action::Assign => {
                match message.payload::<Work>() {
                    Ok(Some(work)) => {
                        *repoll_at = None;
                        // The server only assigns to an agent it believes idle; it wins.
                        if let Some(Running { unit, handle, follow_up }) = running.take() {
                            warn!(
                                agent = %self.agent,
                                current = %unit.description(),
                                "New assignment while busy; cancelling current work"
                            );
                            unit.cancel(&self.environment, &self.runtime_info());
                            self.settle(follow_up, handle.await).await;
                        }
                        *running = Some(self.start(work));
                    }
                    Ok(None) => {
                        warn!(agent = %self.agent, "Assignment without work");
                        *repoll_at = Some(self.next_poll());
                    }
                    Err(e) => {
                        error!(agent = %self.agent, error = %e, "Undecodable assignment");
                        *repoll_at = Some(self.next_poll());
                    }
                }
            }
            Action::CancelBuild => match running {
                Some(current) => current.unit.cancel(&self.environment, &self.runtime_info()),
                None => debug!(agent = %self.agent, "Cancel requested with nothing running"),
            },
            Action::Reregister => {
                warn!(agent = %self.agent, "Server does not know this agent; registering again");
                self.register().await;
                if running.is_none() {
                    *repoll_at = Some(self.next_poll());
                }
            }
            Action::Acknowledge => {
                debug!(agent = %self.agent, ack = ?message.data(), "Frame acknowledged");
            }
            other => {
                warn!(
                    agent = %self.agent,
                    action = ?other,
                    "Ignoring agent-bound frame with server-bound action"
                );
            }
        }
    }

    fn start(&self, work: Work) -> Running {
        let unit = unit_for(work.clone());
        info!(agent = %self.agent, work = %unit.description(), "Starting work");

        let (console, follow_up): (Arc<dyn ConsoleSink>, FollowUp) = match &work {
            Work::Build(build) => {
                let job = build.identifier().clone();
                let (channel, rx) = ConsoleChannel::new(ConsoleTarget::Job(job.clone()));
                let publisher = ConsolePublisher::new(
                    self.agent.clone(),
                    Arc::clone(&self.publisher),
                    self.config.console_flush_interval(),
                    self.config.console_batch_lines,
                );
                let console = publisher.spawn(rx);
                (Arc::new(channel), FollowUp::Report { job, console })
            }
            Work::Sleep { .. } => (Arc::new(AgentLogConsole), FollowUp::Idle),
            Work::NoWork | Work::Denied { .. } => (Arc::new(AgentLogConsole), FollowUp::Repoll),
        };

        let ctx = ExecutionContext {
            agent: self.agent.clone(),
            working_dir: self.config.working_dir.clone(),
            console,
            checkout: Arc::clone(&self.checkout),
        };
        let environment = self.environment.clone();
        let task_unit = Arc::clone(&unit);
        // The context owns the console channel; dropping it ends the publisher.
        let handle = tokio::spawn(async move { task_unit.execute(&environment, &ctx).await });

        Running {
            unit,
            handle,
            follow_up,
        }
    }

    /// Report a finished unit; returns when to ask for work next.
    async fn complete(
        &self,
        follow_up: FollowUp,
        finished: std::result::Result<Result<WorkOutcome>, tokio::task::JoinError>,
    ) -> Instant {
        let repoll = matches!(follow_up, FollowUp::Repoll);
        self.settle(follow_up, finished).await;
        if repoll {
            self.next_poll()
        } else {
            self.request_work().await
        }
    }

    /// Flush and report a build's result; other work needs nothing.
    async fn settle(
        &self,
        follow_up: FollowUp,
        finished: std::result::Result<Result<WorkOutcome>, tokio::task::JoinError>,
    ) {
        let outcome = match finished {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(agent = %self.agent, error = %e, "Work failed");
                WorkOutcome::Completed(JobResult::Failed)
            }
            Err(e) => {
                error!(agent = %self.agent, error = %e, "Work task aborted");
                WorkOutcome::Completed(JobResult::Failed)
            }
        };

        if let FollowUp::Report { job, console } = follow_up {
            if let Err(e) = console.await {
                warn!(agent = %self.agent, error = %e, "Console publisher ended abnormally");
            }
            let report = JobReport {
                identifier: job,
                result: outcome.job_result(),
            };
            match Message::with_payload(Action::ReportCompleted, &report) {
                Ok(message) => {
                    let _ = self.send(message).await;
                }
                Err(e) => error!(agent = %self.agent, error = %e, "Could not encode job report"),
            }
        }
    }

    /// Send `Idle`; returns the deadline for asking again if no assignment arrives.
    async fn request_work(&self) -> Instant {
        match self.send(Message::new(Action::Idle, None)).await {
            Ok(()) => Instant::now() + self.config.assignment_timeout(),
            Err(_) => self.next_poll(),
        }
    }

    async fn register(&self) {
        match Message::with_payload(Action::Register, &self.agent) {
            Ok(message) => {
                let _ = self.send(message).await;
            }
            Err(e) => error!(agent = %self.agent, error = %e, "Could not encode registration"),
        }
    }

    async fn send(&self, message: Message) -> Result<()> {
        let action = message.action();
        let result = self.publisher.publish(&self.agent, message).await;
        if let Err(e) = &result {
            warn!(agent = %self.agent, action = ?action, error = %e, "Failed to send frame");
        }
        result
    }

    fn next_poll(&self) -> Instant {
        Instant::now() + self.config.poll_interval()
    }

    fn runtime_info(&self) -> AgentRuntimeInfo {
        AgentRuntimeInfo {
            identifier: self.agent.clone(),
            location: self.config.working_dir.clone(),
        }
    }
}

async fn join(
    running: &mut Option<Running>,
) -> std::result::Result<Result<WorkOutcome>, tokio::task::JoinError> {
    match running {
        Some(current) => (&mut current.handle).await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
