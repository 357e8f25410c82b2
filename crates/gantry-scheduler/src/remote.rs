//! Server-side handling of frames received from agents.

use crate::broker::WorkAssignmentBroker;
use crate::fleet::AgentFleet;
use gantry_core::console::ConsoleTarget;
use gantry_core::message::{Action, ConsoleBatch, Message};
use gantry_core::ports::MessagePublisher;
use gantry_core::work::JobReport;
use gantry_core::{AgentIdentifier, Error, Result};
use std::sync::Arc;
use tracing::{Instrument, debug, info, warn};

/// Destination for rendered console output received from agents.
pub trait ConsoleLogWriter: Send + Sync {
    fn append(&self, target: &ConsoleTarget, rendered: &str);
}

/// Writes console output to the log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsoleLog;

impl ConsoleLogWriter for TracingConsoleLog {
    fn append(&self, target: &ConsoleTarget, rendered: &str) {
        let target = match target {
            ConsoleTarget::Job(job) => job.build_locator(),
            ConsoleTarget::Build(id) => id.to_string(),
        };
        debug!(job = %target, output = %rendered.trim_end(), "Console output");
    }
}

pub struct AgentRemoteHandler {
    fleet: Arc<AgentFleet>,
    broker: Arc<WorkAssignmentBroker>,
    publisher: Arc<dyn MessagePublisher>,
    console: Arc<dyn ConsoleLogWriter>,
}

impl AgentRemoteHandler {
    pub fn new(
        fleet: Arc<AgentFleet>,
        broker: Arc<WorkAssignmentBroker>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            fleet,
            broker,
            publisher,
            console: Arc::new(TracingConsoleLog),
        }
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleLogWriter>) -> Self {
        self.console = console;
        self
    }

    /// Forget `agent`: drop it from the fleet and close its assignment lane.
    pub fn remove_agent(&self, agent: &AgentIdentifier) -> bool {
        self.broker.disconnect(agent);
        let removed = self.fleet.remove(agent);
        if removed {
            info!(agent = %agent, "Agent removed");
        }
        removed
    }

    /// Close the assignment lanes of agents that lost contact.
    ///
    /// They stay in the fleet; an agent that comes back gets a fresh lane
    /// with its next idle frame.
    pub fn release_lost_agents(&self) -> Vec<AgentIdentifier> {
        let lost = self.fleet.lost_contact_agents();
        for agent in &lost {
            self.broker.disconnect(agent);
        }
        lost
    }

    /// Handle one inbound frame, then acknowledge it.
    ///
    /// Frames from agents the fleet does not know are answered with
    /// `Reregister` instead of being processed.
    pub async fn process(&self, agent: &AgentIdentifier, message: Message) -> Result<()> {
        let span = gantry_trace::agent_span(agent, "process_frame");
        self.dispatch(agent, &message).instrument(span).await?;

        if message.action() != Action::Acknowledge {
            self.publisher.publish(agent, message.acknowledge()).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, agent: &AgentIdentifier, message: &Message) -> Result<()> {
        match message.action() {
            Action::Register => {
                match message.payload::<AgentIdentifier>()? {
                    Some(announced) if announced.uuid != agent.uuid => {
                        warn!(
                            agent = %agent,
                            announced = %announced,
                            "Registration for another agent"
                        );
                        return Ok(());
                    }
                    _ => {}
                }
                self.fleet.register(agent.clone());
                self.fleet.ping(agent)
            }
            Action::Ping => self.heartbeat(agent).await,
            Action::Idle => {
                self.heartbeat(agent).await?;
                self.broker.on_idle_agent(agent.clone());
                Ok(())
            }
            Action::ConsoleOut => {
                let batch: ConsoleBatch = message.payload()?.unwrap_or_default();
                for transmission in &batch.transmissions {
                    self.console.append(transmission.target(), &transmission.render());
                }
                Ok(())
            }
            Action::ReportCurrentStatus | Action::ReportCompleting => {
                self.heartbeat(agent).await?;
                if let Some(report) = message.payload::<JobReport>()? {
                    debug!(
                        agent = %agent,
                        job = %report.identifier,
                        result = ?report.result,
                        "Job status"
                    );
                }
                Ok(())
            }
            Action::ReportCompleted => {
                self.heartbeat(agent).await?;
                if let Some(report) = message.payload::<JobReport>()? {
                    info!(
                        agent = %agent,
                        job = %report.identifier,
                        result = ?report.result,
                        "Job completed"
                    );
                }
                Ok(())
            }
            Action::Acknowledge => {
                debug!(agent = %agent, ack = ?message.data(), "Frame acknowledged");
                Ok(())
            }
            Action::Assign | Action::CancelBuild | Action::Reregister => {
                warn!(
                    agent = %agent,
                    action = ?message.action(),
                    "Ignoring server-bound frame with agent-bound action"
                );
                Ok(())
            }
        }
    }

    async fn heartbeat(&self, agent: &AgentIdentifier) -> Result<()> {
        match self.fleet.ping(agent) {
            Ok(()) => Ok(()),
            Err(Error::AgentNotFound(_)) => {
                warn!(agent = %agent, "Frame from unregistered agent; requesting reregistration");
                self.publisher
                    .publish(agent, Message::new(Action::Reregister, None))
                    .await
            }
            Err(e) => Err(e),
        }
    }
}
