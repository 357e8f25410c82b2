//! Persistent NATS connection carrying agent frames.

use crate::config::NatsConfig;
use crate::metrics::{LatencyTimer, NatsMetrics};
use crate::subjects::{self, AgentEnvelope};
use async_trait::async_trait;
use futures::StreamExt;
use gantry_core::message::Message;
use gantry_core::ports::MessagePublisher;
use gantry_core::{AgentIdentifier, Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Which end of the conversation this connection speaks for.
///
/// Decides where [`MessagePublisher::publish`] sends a frame: the server
/// writes to the agent's inbox, an agent writes to its server-bound subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Agent,
}

#[derive(Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
    config: NatsConfig,
    side: Side,
    metrics: Arc<NatsMetrics>,
}

impl NatsTransport {
    pub async fn connect(config: NatsConfig, side: Side) -> Result<Self> {
        let urls = config.urls.join(",");
        info!(urls = %urls, side = ?side, "Connecting to NATS");

        let metrics = NatsMetrics::new();
        let events = Arc::clone(&metrics);

        let mut options = async_nats::ConnectOptions::new()
            .connection_timeout(config.connection_timeout)
            .request_timeout(Some(config.request_timeout))
            .retry_on_initial_connect()
            .event_callback(move |event| {
                let metrics = Arc::clone(&events);
                async move {
                    match event {
                        async_nats::Event::Connected => {
                            info!("NATS connection established");
                            metrics.set_connected(true);
                        }
                        async_nats::Event::Disconnected => {
                            warn!("NATS connection lost");
                            metrics.set_connected(false);
                        }
                        other => debug!(event = ?other, "NATS connection event"),
                    }
                }
            });
        if let Some(max) = config.max_reconnect_attempts {
            options = options.max_reconnects(max);
        }
        if let Some(name) = &config.client_name {
            options = options.name(name);
        }

        let client = options
            .connect(&urls)
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect to NATS: {}", e)))?;
        metrics.set_connected(true);

        Ok(Self {
            client,
            config,
            side,
            metrics,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn metrics(&self) -> &Arc<NatsMetrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Frames the server sends to `agent`, in arrival order.
    pub async fn agent_inbox(&self, agent: &AgentIdentifier) -> Result<mpsc::Receiver<Message>> {
        let subject = subjects::agent_inbox(&self.config.subject_prefix, &agent.uuid)?;
        self.subscribe(subject, |_, bytes| Message::decode(bytes)).await
    }

    /// Frames from every agent, each with the sender's identity.
    pub async fn server_inbound(&self) -> Result<mpsc::Receiver<AgentEnvelope>> {
        let subject = subjects::all_agents_to_server(&self.config.subject_prefix);
        let prefix = self.config.subject_prefix.clone();
        self.subscribe(subject, move |subject, bytes| {
            AgentEnvelope::decode_from(&prefix, subject, bytes)
        })
        .await
    }

    /// Wait until everything published so far has reached the server.
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("Failed to flush NATS connection: {}", e)))
    }

    /// Drain subscriptions and close the connection.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Draining NATS connection");
        if let Err(e) = self.client.drain().await {
            error!(error = %e, "Error draining NATS connection");
        }
        self.metrics.set_connected(false);
        Ok(())
    }

    async fn subscribe<T, F>(&self, subject: String, decode: F) -> Result<mpsc::Receiver<T>>
    where
        T: Send + 'static,
        F: Fn(&str, &[u8]) -> Result<T> + Send + 'static,
    {
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| {
                Error::Transport(format!("Failed to subscribe to {}: {}", subject, e))
            })?;
        debug!(subject = %subject, "Subscribed");

        let (tx, rx) = mpsc::channel(self.config.inbox_capacity.max(1));
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                metrics.record_receive(message.payload.len() as u64);
                match decode(&message.subject, &message.payload) {
                    Ok(frame) => {
                        if tx.send(frame).await.is_err() {
                            debug!(subject = %subject, "Receiver dropped; ending subscription");
                            break;
                        }
                    }
                    Err(e) => {
                        metrics.record_decode_failure();
                        warn!(subject = %message.subject, error = %e, "Dropping undecodable frame");
                    }
                }
            }
            if let Err(e) = subscriber.unsubscribe().await {
                debug!(error = %e, "Unsubscribe after close failed");
            }
        });

        Ok(rx)
    }

    fn outbound(&self, agent: &AgentIdentifier, message: Message) -> Result<(String, Vec<u8>)> {
        let prefix = &self.config.subject_prefix;
        match self.side {
            Side::Server => Ok((subjects::agent_inbox(prefix, &agent.uuid)?, message.encode()?)),
            Side::Agent => Ok((
                subjects::agent_to_server(prefix, &agent.uuid)?,
                AgentEnvelope::new(agent.clone(), message).encode()?,
            )),
        }
    }
}

#[async_trait]
impl MessagePublisher for NatsTransport {
    async fn publish(&self, agent: &AgentIdentifier, message: Message) -> Result<()> {
        let action = message.action();
        let (subject, payload) = self.outbound(agent, message)?;
        let bytes = payload.len() as u64;
        let timer = LatencyTimer::start();

        match self.client.publish(subject.clone(), payload.into()).await {
            Ok(()) => {
                let latency_ms = timer.elapsed_ms();
                self.metrics.record_publish(bytes, latency_ms);
                debug!(subject = %subject, action = ?action, latency_ms, "Published frame");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_publish_failure();
                Err(Error::Transport(format!(
                    "Failed to publish to {}: {}",
                    subject, e
                )))
            }
        }
    }
}
