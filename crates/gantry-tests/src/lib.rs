//! Integration test infrastructure for Gantry.
//!
//! Fixtures and an in-process loopback network for wiring the scheduler and
//! agents together, plus a testcontainers-managed NATS server for transport
//! tests.
//!
//! # Usage
//!
//! ```ignore
//! use gantry_tests::{Loopback, ScriptedResolver};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let net = Loopback::new();
//!     let inbox = net.attach(&agent);
//!     // hand net.server() to the broker, net.agent_link() to the agent
//! }
//! ```

pub mod containers;
pub mod fixtures;
pub mod network;

pub use fixtures::*;
pub use network::{AgentLink, Loopback, ServerPublisher};

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}
