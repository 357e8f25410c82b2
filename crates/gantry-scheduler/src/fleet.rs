//! Registry of connected agents.

use crate::liveness::AgentLivenessMonitor;
use dashmap::DashMap;
use gantry_core::clock::Clock;
use gantry_core::{AgentIdentifier, Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

struct FleetEntry {
    monitor: AgentLivenessMonitor,
    enabled: AtomicBool,
}

/// Point-in-time view of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub agent: AgentIdentifier,
    pub enabled: bool,
    pub last_ping_millis: i64,
    pub lost_contact: bool,
}

/// Connected agents, each with its own liveness monitor.
pub struct AgentFleet {
    agents: DashMap<AgentIdentifier, Arc<FleetEntry>>,
    ping_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl AgentFleet {
    pub fn new(ping_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            agents: DashMap::new(),
            ping_interval,
            clock,
        }
    }

    /// Add an agent, enabled. Returns false if it was already registered.
    pub fn register(&self, agent: AgentIdentifier) -> bool {
        let mut inserted = false;
        self.agents.entry(agent.clone()).or_insert_with(|| {
            inserted = true;
            Arc::new(FleetEntry {
                monitor: AgentLivenessMonitor::new(self.ping_interval, Arc::clone(&self.clock)),
                enabled: AtomicBool::new(true),
            })
        });

        if inserted {
            info!(agent = %agent, "Agent registered");
        }
        inserted
    }

    pub fn ping(&self, agent: &AgentIdentifier) -> Result<()> {
        self.entry(agent)?.monitor.ping_success();
        Ok(())
    }

    pub fn enable(&self, agent: &AgentIdentifier) -> Result<()> {
        self.entry(agent)?.enabled.store(true, Ordering::Release);
        info!(agent = %agent, "Agent enabled");
        Ok(())
    }

    pub fn disable(&self, agent: &AgentIdentifier) -> Result<()> {
        self.entry(agent)?.enabled.store(false, Ordering::Release);
        info!(agent = %agent, "Agent disabled");
        Ok(())
    }

    pub fn remove(&self, agent: &AgentIdentifier) -> bool {
        self.agents.remove(agent).is_some()
    }

    /// Why `agent` may not receive work, or `None` if it may.
    pub fn denial_reason(&self, agent: &AgentIdentifier) -> Option<String> {
        let Some(entry) = self.agents.get(agent).map(|e| Arc::clone(e.value())) else {
            return Some(format!("agent {} is not registered", agent.uuid));
        };
        if !entry.enabled.load(Ordering::Acquire) {
            return Some(format!("agent {} is disabled", agent.uuid));
        }
        if entry.monitor.has_lost_contact() {
            return Some(format!("agent {} has lost contact", agent.uuid));
        }
        None
    }

    pub fn is_assignable(&self, agent: &AgentIdentifier) -> bool {
        self.denial_reason(agent).is_none()
    }

    /// Agents that missed two consecutive pings.
    pub fn lost_contact_agents(&self) -> Vec<AgentIdentifier> {
        let lost: Vec<_> = self
            .agents
            .iter()
            .filter(|e| e.value().monitor.has_lost_contact())
            .map(|e| e.key().clone())
            .collect();

        for agent in &lost {
            warn!(agent = %agent, "Agent lost contact");
        }
        lost
    }

    pub fn statuses(&self) -> Vec<AgentStatus> {
        let mut statuses: Vec<_> = self
            .agents
            .iter()
            .map(|e| AgentStatus {
                agent: e.key().clone(),
                enabled: e.value().enabled.load(Ordering::Acquire),
                last_ping_millis: e.value().monitor.last_ping(),
                lost_contact: e.value().monitor.has_lost_contact(),
            })
            .collect();
        statuses.sort_by(|a, b| a.agent.cmp(&b.agent));
        statuses
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn entry(&self, agent: &AgentIdentifier) -> Result<Arc<FleetEntry>> {
        self.agents
            .get(agent)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::AgentNotFound(agent.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::clock::ManualClock;

    fn agent(uuid: &str) -> AgentIdentifier {
        AgentIdentifier::new(format!("{uuid}.local"), "10.0.0.1", uuid)
    }

    fn fleet() -> (AgentFleet, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (AgentFleet::new(Duration::from_secs(10), clock.clone()), clock)
    }

    #[test]
    fn test_register_is_idempotent() {
        let (fleet, _) = fleet();
        assert!(fleet.register(agent("a")));
        assert!(!fleet.register(agent("a")));
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn test_unknown_agent() {
        let (fleet, _) = fleet();
        assert!(matches!(fleet.ping(&agent("ghost")), Err(Error::AgentNotFound(_))));
        assert!(fleet.denial_reason(&agent("ghost")).unwrap().contains("not registered"));
    }

    #[test]
    fn test_disabled_agent_is_not_assignable() {
        let (fleet, _) = fleet();
        fleet.register(agent("a"));
        assert!(fleet.is_assignable(&agent("a")));

        fleet.disable(&agent("a")).unwrap();
        assert!(fleet.denial_reason(&agent("a")).unwrap().contains("disabled"));

        fleet.enable(&agent("a")).unwrap();
        assert!(fleet.is_assignable(&agent("a")));
    }

    #[test]
    fn test_lost_contact_agents() {
        let (fleet, clock) = fleet();
        fleet.register(agent("quiet"));
        fleet.register(agent("chatty"));

        clock.advance(15_000);
        fleet.ping(&agent("chatty")).unwrap();
        clock.advance(5_000);

        assert_eq!(fleet.lost_contact_agents(), vec![agent("quiet")]);
        assert!(!fleet.is_assignable(&agent("quiet")));

        let statuses = fleet.statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().any(|s| s.agent == agent("quiet") && s.lost_contact));
    }
}
