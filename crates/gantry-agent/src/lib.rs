//! Build agent for Gantry.
//!
//! Asks the server for work, checks out materials, runs build steps and
//! streams their console output back.

pub mod agent;
pub mod checkout;
pub mod config;
pub mod console;
pub mod heartbeat;
mod process;
pub mod scm;
pub mod work;

#[cfg(test)]
mod testing;

pub use agent::AgentController;
pub use checkout::MaterialCheckoutOrchestrator;
pub use config::AgentConfig;
pub use console::{ConsoleChannel, ConsolePublisher};
pub use heartbeat::HeartbeatService;
pub use scm::{CommandLineScm, ScmUpdater};
pub use work::{
    AgentRuntimeInfo, BuildUnit, DeniedUnit, EnvironmentVariables, ExecutionContext, NoWorkUnit,
    SleepUnit, UnitOfWork, WorkOutcome, unit_for,
};
