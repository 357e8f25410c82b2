//! Heartbeat loop for periodic liveness reporting.

use gantry_core::message::{Action, Message};
use gantry_core::ports::MessagePublisher;
use gantry_core::AgentIdentifier;
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sends a `Ping` frame every interval until cancelled.
pub struct HeartbeatService {
    agent: AgentIdentifier,
    publisher: Arc<dyn MessagePublisher>,
    interval: Duration,
}

impl HeartbeatService {
    pub fn new(
        agent: AgentIdentifier,
        publisher: Arc<dyn MessagePublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            agent,
            publisher,
            interval,
        }
    }

    /// Run the heartbeat loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            agent = %self.agent,
            interval_ms = self.interval.as_millis() as u64,
            "Starting heartbeat service"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat service shutting down");
                    break;
                }
                _ = ticker.tick() => self.send_heartbeat().await,
            }
        }
    }

    async fn send_heartbeat(&self) {
        let ping = Message::new(Action::Ping, None);
        match self.publisher.publish(&self.agent, ping).await {
            Ok(()) => debug!(agent = %self.agent, "Heartbeat sent"),
            Err(e) => warn!(agent = %self.agent, error = %e, "Failed to send heartbeat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_core::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPublisher {
        pings: AtomicUsize,
    }

    #[async_trait]
    impl MessagePublisher for CountingPublisher {
        async fn publish(&self, _agent: &AgentIdentifier, message: Message) -> Result<()> {
            assert_eq!(message.action(), Action::Ping);
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_until_cancelled() {
        let publisher = Arc::new(CountingPublisher::default());
        let service = HeartbeatService::new(
            AgentIdentifier::new("h", "127.0.0.1", "u"),
            publisher.clone(),
            Duration::from_secs(5),
        );
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { service.run(shutdown).await }
        });

        // Ticks at 0s, 5s and 10s.
        tokio::time::sleep(Duration::from_millis(12_000)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(publisher.pings.load(Ordering::SeqCst), 3);
    }
}
