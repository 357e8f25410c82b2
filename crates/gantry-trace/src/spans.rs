//! Span creation for dispatch operations.

use gantry_core::material::Material;
use gantry_core::{AgentIdentifier, JobIdentifier};
use tracing::{Level, Span, span};

/// Span for an agent-level operation (heartbeat, idle, frame handling).
pub fn agent_span(agent: &AgentIdentifier, operation: &str) -> Span {
    span!(
        Level::INFO,
        "agent.operation",
        operation = operation,
        agent.uuid = agent.uuid.as_str(),
        agent.hostname = agent.hostname.as_str(),
    )
}

/// Span around one resolver call.
pub fn resolve_span(agent: &AgentIdentifier) -> Span {
    span!(
        Level::INFO,
        "work.resolve",
        agent.uuid = agent.uuid.as_str(),
        outcome = tracing::field::Empty,
    )
}

/// Span for the execution of one job.
pub fn job_span(job: &JobIdentifier) -> Span {
    span!(
        Level::INFO,
        "job.execute",
        ci.pipeline.name = job.pipeline_name.as_str(),
        ci.pipeline.counter = job.pipeline_counter,
        ci.stage.name = job.stage_name.as_str(),
        ci.stage.counter = job.stage_counter,
        ci.job.name = job.build_name.as_str(),
        ci.build.id = job.build_id.0,
    )
}

/// Span for checking out one material.
pub fn checkout_span(material: &Material) -> Span {
    span!(
        Level::DEBUG,
        "material.checkout",
        material.name = %material.display_name(),
        material.fingerprint = %material.fingerprint(),
    )
}
