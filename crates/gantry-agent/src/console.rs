//! Console output from a running job, batched into `ConsoleOut` frames.

use gantry_core::console::{ConsoleTarget, ConsoleTransmission};
use gantry_core::message::{Action, ConsoleBatch, Message};
use gantry_core::ports::{ConsoleSink, MessagePublisher};
use gantry_core::AgentIdentifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Console sink that queues transmissions for a [`ConsolePublisher`].
///
/// Timestamps are taken when a line is written, not when it is sent.
#[derive(Clone)]
pub struct ConsoleChannel {
    target: ConsoleTarget,
    tx: mpsc::UnboundedSender<ConsoleTransmission>,
}

impl ConsoleChannel {
    pub fn new(target: ConsoleTarget) -> (Self, mpsc::UnboundedReceiver<ConsoleTransmission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { target, tx }, rx)
    }

    fn send(&self, tag: Option<&str>, line: &str) {
        let transmission = ConsoleTransmission::new(tag, line, self.target.clone());
        if self.tx.send(transmission).is_err() {
            debug!("Console publisher gone; dropping line");
        }
    }
}

impl ConsoleSink for ConsoleChannel {
    fn std_output(&self, line: &str) {
        self.send(None, line);
    }

    fn tagged_output(&self, tag: &str, line: &str) {
        self.send(Some(tag), line);
    }

    fn tagged_err_output(&self, tag: &str, line: &str) {
        self.send(Some(tag), line);
    }
}

/// Flushes queued console lines on an interval, when a batch fills up, and
/// once more when every [`ConsoleChannel`] has been dropped.
pub struct ConsolePublisher {
    agent: AgentIdentifier,
    publisher: Arc<dyn MessagePublisher>,
    flush_interval: Duration,
    max_batch_lines: usize,
}

impl ConsolePublisher {
    pub fn new(
        agent: AgentIdentifier,
        publisher: Arc<dyn MessagePublisher>,
        flush_interval: Duration,
        max_batch_lines: usize,
    ) -> Self {
        Self {
            agent,
            publisher,
            flush_interval,
            max_batch_lines: max_batch_lines.max(1),
        }
    }

    pub fn spawn(self, rx: mpsc::UnboundedReceiver<ConsoleTransmission>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<ConsoleTransmission>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut pending = Vec::new();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(transmission) => {
                        pending.push(transmission);
                        if pending.len() >= self.max_batch_lines {
                            self.flush(&mut pending).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush(&mut pending).await,
            }
        }

        self.flush(&mut pending).await;
    }

    async fn flush(&self, pending: &mut Vec<ConsoleTransmission>) {
        if pending.is_empty() {
            return;
        }

        let batch = ConsoleBatch::new(std::mem::take(pending));
        let lines = batch.len();
        let result = match Message::with_payload(Action::ConsoleOut, &batch) {
            Ok(message) => self.publisher.publish(&self.agent, message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!(lines, "Console batch sent"),
            Err(e) => warn!(lines, error = %e, "Failed to send console batch"),
        }
    }
}
