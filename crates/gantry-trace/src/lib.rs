//! Logging and OpenTelemetry integration for Gantry.
//!
//! Installs the process-wide `tracing` subscriber and provides span
//! constructors carrying dispatch attributes for agents, jobs and materials.

pub mod spans;
pub mod tracer;

pub use spans::{agent_span, checkout_span, job_span, resolve_span};
pub use tracer::{LogFormat, OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer};
