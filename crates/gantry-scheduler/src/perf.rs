//! Dispatch metrics: the default performance logger.

use gantry_core::ports::{PerformanceLogger, ResolveOutcome, ResolveTiming};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Counters over every resolve call.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub resolutions: AtomicU64,
    pub assigned: AtomicU64,
    pub no_work: AtomicU64,
    pub denied: AtomicU64,
    pub failures: AtomicU64,
    pub total_resolve_ms: AtomicU64,
    pub max_resolve_ms: AtomicU64,
    slow_threshold_ms: u64,
}

impl DispatchMetrics {
    pub fn new(slow_threshold_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            slow_threshold_ms,
            ..Self::default()
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let resolutions = self.resolutions.load(Ordering::Relaxed);
        let total = self.total_resolve_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            resolutions,
            assigned: self.assigned.load(Ordering::Relaxed),
            no_work: self.no_work.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            max_resolve_ms: self.max_resolve_ms.load(Ordering::Relaxed),
            mean_resolve_ms: if resolutions == 0 { 0 } else { total / resolutions },
        }
    }
}

impl PerformanceLogger for DispatchMetrics {
    fn record(&self, timing: ResolveTiming) {
        let elapsed = u64::try_from(timing.elapsed_ms()).unwrap_or(0);

        self.resolutions.fetch_add(1, Ordering::Relaxed);
        self.total_resolve_ms.fetch_add(elapsed, Ordering::Relaxed);
        self.max_resolve_ms.fetch_max(elapsed, Ordering::Relaxed);

        let counter = match timing.outcome {
            ResolveOutcome::Assigned => &self.assigned,
            ResolveOutcome::NoWork => &self.no_work,
            ResolveOutcome::Denied => &self.denied,
            ResolveOutcome::Failed => &self.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.slow_threshold_ms > 0 && elapsed >= self.slow_threshold_ms {
            warn!(
                agent = %timing.agent,
                elapsed_ms = elapsed,
                outcome = ?timing.outcome,
                "Slow work resolution"
            );
        } else {
            debug!(
                agent = %timing.agent,
                started_at = %timing.started_at,
                finished_at = %timing.finished_at,
                elapsed_ms = elapsed,
                outcome = ?timing.outcome,
                "Work resolved"
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub resolutions: u64,
    pub assigned: u64,
    pub no_work: u64,
    pub denied: u64,
    pub failures: u64,
    pub max_resolve_ms: u64,
    pub mean_resolve_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use gantry_core::AgentIdentifier;

    fn timing(ms: i64, outcome: ResolveOutcome) -> ResolveTiming {
        let started_at = Utc::now();
        ResolveTiming {
            agent: AgentIdentifier::new("h", "127.0.0.1", "u"),
            started_at,
            finished_at: started_at + Duration::milliseconds(ms),
            outcome,
        }
    }

    #[test]
    fn test_counters() {
        let metrics = DispatchMetrics::new(0);
        metrics.record(timing(10, ResolveOutcome::Assigned));
        metrics.record(timing(30, ResolveOutcome::NoWork));
        metrics.record(timing(20, ResolveOutcome::Failed));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.resolutions, 3);
        assert_eq!(snapshot.assigned, 1);
        assert_eq!(snapshot.no_work, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.max_resolve_ms, 30);
        assert_eq!(snapshot.mean_resolve_ms, 20);
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(DispatchMetrics::new(100).snapshot().mean_resolve_ms, 0);
    }
}
