//! Idle-agent to work assignment.
//!
//! Every idle notification produces exactly one `Assign` frame. The frame
//! defaults to [`Work::NoWork`] and is published whether the resolver returns,
//! fails or panics; only after publishing is a failure logged and returned.
//!
//! Notifications for one agent are processed in arrival order on that agent's
//! lane. Lanes of different agents run independently, with a shared semaphore
//! bounding how many resolver calls are in flight.

use crate::fleet::AgentFleet;
use crate::health::HealthRegistry;
use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use gantry_core::health::{HealthState, HealthStateScope};
use gantry_core::message::{Action, Message};
use gantry_core::ports::{
    BuildAssignmentResolver, MessagePublisher, PerformanceLogger, ResolveOutcome, ResolveTiming,
};
use gantry_core::work::Work;
use gantry_core::{AgentIdentifier, Error, Result};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{Instrument, debug, error, info, warn};

const RESOLUTION_FAILING: &str = "Work resolution failing";

struct BrokerInner {
    resolver: Arc<dyn BuildAssignmentResolver>,
    publisher: Arc<dyn MessagePublisher>,
    perf: Option<Arc<dyn PerformanceLogger>>,
    fleet: Option<Arc<AgentFleet>>,
    health: Option<Arc<HealthRegistry>>,
    permits: Semaphore,
}

pub struct WorkAssignmentBroker {
    inner: Arc<BrokerInner>,
    lanes: DashMap<AgentIdentifier, mpsc::UnboundedSender<()>>,
}

pub struct BrokerBuilder {
    resolver: Arc<dyn BuildAssignmentResolver>,
    publisher: Arc<dyn MessagePublisher>,
    perf: Option<Arc<dyn PerformanceLogger>>,
    fleet: Option<Arc<AgentFleet>>,
    health: Option<Arc<HealthRegistry>>,
    max_concurrent_resolutions: usize,
}

impl BrokerBuilder {
    pub fn performance_logger(mut self, perf: Arc<dyn PerformanceLogger>) -> Self {
        self.perf = Some(perf);
        self
    }

    /// Consult the fleet before resolving; disabled or unknown agents are denied.
    pub fn fleet(mut self, fleet: Arc<AgentFleet>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    /// Record resolver failures as a global health error.
    pub fn health(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn max_concurrent_resolutions(mut self, max: usize) -> Self {
        self.max_concurrent_resolutions = max.max(1);
        self
    }

    pub fn build(self) -> WorkAssignmentBroker {
        WorkAssignmentBroker {
            inner: Arc::new(BrokerInner {
                resolver: self.resolver,
                publisher: self.publisher,
                perf: self.perf,
                fleet: self.fleet,
                health: self.health,
                permits: Semaphore::new(self.max_concurrent_resolutions),
            }),
            lanes: DashMap::new(),
        }
    }
}

impl WorkAssignmentBroker {
    pub fn builder(
        resolver: Arc<dyn BuildAssignmentResolver>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> BrokerBuilder {
        BrokerBuilder {
            resolver,
            publisher,
            perf: None,
            fleet: None,
            health: None,
            max_concurrent_resolutions: 32,
        }
    }

    /// Queue an assignment for `agent`. Never blocks the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_idle_agent(&self, agent: AgentIdentifier) {
        let lane = self
            .lanes
            .entry(agent.clone())
            .or_insert_with(|| self.spawn_lane(agent.clone()))
            .clone();

        if lane.send(()).is_err() {
            // The lane task ended underneath us; start a fresh one.
            let lane = self.spawn_lane(agent.clone());
            let _ = lane.send(());
            self.lanes.insert(agent, lane);
        }
    }

    /// Resolve and publish one assignment for `agent` on the calling task.
    pub async fn assign_work_to_agent(&self, agent: &AgentIdentifier) -> Result<Work> {
        self.inner.assign_work_to_agent(agent).await
    }

    /// Close the agent's lane once its queued notifications are processed.
    pub fn disconnect(&self, agent: &AgentIdentifier) {
        if self.lanes.remove(agent).is_some() {
            debug!(agent = %agent, "Assignment lane closed");
        }
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    fn spawn_lane(&self, agent: AgentIdentifier) -> mpsc::UnboundedSender<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let inner = Arc::clone(&self.inner);
        let span = gantry_trace::agent_span(&agent, "assignment_lane");

        tokio::spawn(
            async move {
                while rx.recv().await.is_some() {
                    // Failures are logged inside; the lane keeps serving.
                    let _ = inner.assign_work_to_agent(&agent).await;
                }
            }
            .instrument(span),
        );
        tx
    }
}

impl BrokerInner {
    async fn assign_work_to_agent(&self, agent: &AgentIdentifier) -> Result<Work> {
        if let Some(reason) = self.fleet.as_ref().and_then(|f| f.denial_reason(agent)) {
            return self.deny(agent, reason).await;
        }

        let mut assignment = Work::NoWork;
        let span = gantry_trace::resolve_span(agent);
        let started_at = Utc::now();

        let resolved = match self.permits.acquire().await {
            Ok(_permit) => {
                AssertUnwindSafe(self.resolver.resolve(agent))
                    .catch_unwind()
                    .instrument(span.clone())
                    .await
            }
            Err(_) => Ok(Err(Error::Internal("resolver permits closed".to_string()))),
        };

        let failure = match resolved {
            Ok(Ok(work)) => {
                assignment = work;
                None
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("resolver panicked: {}", panic_message(panic.as_ref()))),
        };
        let finished_at = Utc::now();

        let published = self.publish_assignment(agent, &assignment).await;

        let outcome = match (&failure, &assignment) {
            (Some(_), _) => ResolveOutcome::Failed,
            (None, Work::NoWork) => ResolveOutcome::NoWork,
            (None, Work::Denied { .. }) => ResolveOutcome::Denied,
            (None, _) => ResolveOutcome::Assigned,
        };
        span.record("outcome", format!("{:?}", outcome).as_str());
        self.record(agent, started_at, finished_at, outcome);

        if let Some(message) = failure {
            error!(agent = %agent, error = %message, "Work resolution failed; sent no work");
            if let Some(health) = &self.health {
                health.update(HealthState::error(
                    RESOLUTION_FAILING,
                    message.clone(),
                    HealthStateScope::global(),
                ));
            }
            return Err(Error::ResolutionFailed(message));
        }

        if let Some(health) = &self.health {
            // Other global alerts are not ours to clear.
            health.remove_if(&HealthStateScope::global(), |s| s.message == RESOLUTION_FAILING);
        }
        published?;

        if assignment.is_build() {
            info!(agent = %agent, work = %assignment.description(), "Work assigned");
        }
        Ok(assignment)
    }

    async fn deny(&self, agent: &AgentIdentifier, reason: String) -> Result<Work> {
        warn!(agent = %agent, reason = %reason, "Denying work");
        let now = Utc::now();
        let work = Work::Denied { reason };
        let published = self.publish_assignment(agent, &work).await;
        self.record(agent, now, now, ResolveOutcome::Denied);
        published?;
        Ok(work)
    }

    async fn publish_assignment(&self, agent: &AgentIdentifier, work: &Work) -> Result<()> {
        let result = match Message::with_payload(Action::Assign, work) {
            Ok(message) => self.publisher.publish(agent, message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            error!(agent = %agent, error = %e, "Failed to publish assignment");
        }
        result
    }

    fn record(
        &self,
        agent: &AgentIdentifier,
        started_at: chrono::DateTime<Utc>,
        finished_at: chrono::DateTime<Utc>,
        outcome: ResolveOutcome,
    ) {
        if let Some(perf) = &self.perf {
            perf.record(ResolveTiming {
                agent: agent.clone(),
                started_at,
                finished_at,
                outcome,
            });
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
