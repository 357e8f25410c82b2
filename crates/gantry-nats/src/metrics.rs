//! Counters for the NATS transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct NatsMetrics {
    pub frames_published: AtomicU64,
    pub frames_received: AtomicU64,
    pub publish_failures: AtomicU64,
    /// Frames dropped because their payload did not decode.
    pub decode_failures: AtomicU64,
    pub disconnects: AtomicU64,
    pub bytes_published: AtomicU64,
    pub bytes_received: AtomicU64,
    pub publish_latency_ms_total: AtomicU64,
    connected: AtomicBool,
}

impl NatsMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self, bytes: u64, latency_ms: u64) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published.fetch_add(bytes, Ordering::Relaxed);
        self.publish_latency_ms_total
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive(&self, bytes: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::Relaxed);
        if was && !connected {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let frames_published = self.frames_published.load(Ordering::Relaxed);
        let latency_total = self.publish_latency_ms_total.load(Ordering::Relaxed);
        MetricsSnapshot {
            frames_published,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            avg_publish_latency_ms: latency_total
                .checked_div(frames_published)
                .unwrap_or_default(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_published: u64,
    pub frames_received: u64,
    pub publish_failures: u64,
    pub decode_failures: u64,
    pub disconnects: u64,
    pub connected: bool,
    pub bytes_published: u64,
    pub bytes_received: u64,
    pub avg_publish_latency_ms: u64,
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_latency() {
        let metrics = NatsMetrics::new();
        assert_eq!(metrics.snapshot().avg_publish_latency_ms, 0);

        metrics.record_publish(100, 4);
        metrics.record_publish(50, 8);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_published, 2);
        assert_eq!(snapshot.bytes_published, 150);
        assert_eq!(snapshot.avg_publish_latency_ms, 6);
    }

    #[test]
    fn test_disconnects_counted_on_transition() {
        let metrics = NatsMetrics::new();
        metrics.set_connected(false);
        metrics.set_connected(true);
        metrics.set_connected(false);
        metrics.set_connected(false);

        let snapshot = metrics.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.disconnects, 1);
    }
}
