//! Gantry Scheduler
//!
//! Server side of agent coordination: fleet liveness, idle-agent work
//! assignment, inbound frame handling and health state bookkeeping.

pub mod broker;
pub mod config;
pub mod fleet;
pub mod health;
pub mod liveness;
pub mod perf;
pub mod remote;

pub use broker::{BrokerBuilder, WorkAssignmentBroker};
pub use config::SchedulerConfig;
pub use fleet::{AgentFleet, AgentStatus};
pub use health::HealthRegistry;
pub use liveness::AgentLivenessMonitor;
pub use perf::DispatchMetrics;
pub use remote::{AgentRemoteHandler, ConsoleLogWriter, TracingConsoleLog};
