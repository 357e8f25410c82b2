//! NATS transport for Gantry.
//!
//! Carries [`gantry_core::message::Message`] frames between the server and
//! its agents over one persistent connection per process.

pub mod config;
pub mod metrics;
pub mod subjects;
mod transport;

pub use config::NatsConfig;
pub use metrics::{MetricsSnapshot, NatsMetrics};
pub use subjects::AgentEnvelope;
pub use transport::{NatsTransport, Side};
