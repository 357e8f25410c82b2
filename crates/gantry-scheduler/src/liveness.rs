//! Per-agent heartbeat bookkeeping.

use gantry_core::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Tracks when an agent last pinged.
///
/// The only state is one atomic timestamp, so pings and checks from
/// different tasks need no lock. A monitor starts as if it had just been
/// pinged.
pub struct AgentLivenessMonitor {
    ping_interval: Duration,
    last_ping: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl AgentLivenessMonitor {
    pub fn new(ping_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_millis();
        Self {
            ping_interval,
            last_ping: AtomicI64::new(now),
            clock,
        }
    }

    pub fn ping_success(&self) {
        self.last_ping.store(self.clock.now_millis(), Ordering::Release);
    }

    /// True once two ping intervals pass without a ping, so a single late
    /// heartbeat does not drop the agent.
    pub fn has_lost_contact(&self) -> bool {
        let elapsed = self.clock.now_millis() - self.last_ping.load(Ordering::Acquire);
        elapsed >= self.timeout_millis()
    }

    /// Epoch millis of the last ping.
    pub fn last_ping(&self) -> i64 {
        self.last_ping.load(Ordering::Acquire)
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    fn timeout_millis(&self) -> i64 {
        i64::try_from(self.ping_interval.as_millis())
            .unwrap_or(i64::MAX / 2)
            .saturating_mul(2)
    }
}

impl std::fmt::Debug for AgentLivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLivenessMonitor")
            .field("ping_interval", &self.ping_interval)
            .field("last_ping", &self.last_ping())
            .finish()
    }
}
