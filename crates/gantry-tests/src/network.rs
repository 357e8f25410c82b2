//! In-process stand-in for the agent transport.
//!
//! [`ServerPublisher`] delivers server frames straight into attached agent
//! inboxes; [`AgentLink`] queues agent frames for [`Loopback::serve`], which
//! hands them to an [`AgentRemoteHandler`]. Both keep a log of every frame.

use async_trait::async_trait;
use dashmap::DashMap;
use gantry_core::message::{Action, Message};
use gantry_core::ports::MessagePublisher;
use gantry_core::{AgentIdentifier, Result};
use gantry_scheduler::AgentRemoteHandler;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

type Frame = (AgentIdentifier, Message);

/// Publisher used by the server side.
#[derive(Default)]
pub struct ServerPublisher {
    inboxes: DashMap<String, mpsc::Sender<Message>>,
    sent: Mutex<Vec<Frame>>,
}

impl ServerPublisher {
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    /// Frames sent to `agent` with the given action.
    pub fn sent_to(&self, agent: &AgentIdentifier, action: Action) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|(a, m)| a == agent && m.action() == action)
            .map(|(_, m)| m)
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for ServerPublisher {
    async fn publish(&self, agent: &AgentIdentifier, message: Message) -> Result<()> {
        self.sent.lock().unwrap().push((agent.clone(), message.clone()));
        let inbox = self.inboxes.get(&agent.uuid).map(|entry| entry.value().clone());
        if let Some(inbox) = inbox {
            if inbox.send(message).await.is_err() {
                warn!(agent = %agent, "Agent inbox closed");
            }
        }
        Ok(())
    }
}

/// Publisher used by agents.
pub struct AgentLink {
    tx: mpsc::UnboundedSender<Frame>,
    sent: Mutex<Vec<Frame>>,
}

impl AgentLink {
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn actions(&self, agent: &AgentIdentifier) -> Vec<Action> {
        self.sent()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, m)| m.action())
            .filter(|action| *action != Action::Ping)
            .collect()
    }

    pub fn count(&self, agent: &AgentIdentifier, action: Action) -> usize {
        self.actions(agent).iter().filter(|a| **a == action).count()
    }
}

#[async_trait]
impl MessagePublisher for AgentLink {
    async fn publish(&self, agent: &AgentIdentifier, message: Message) -> Result<()> {
        self.sent.lock().unwrap().push((agent.clone(), message.clone()));
        if self.tx.send((agent.clone(), message)).is_err() {
            warn!(agent = %agent, "Server side gone");
        }
        Ok(())
    }
}

pub struct Loopback {
    server: Arc<ServerPublisher>,
    agents: Arc<AgentLink>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            server: Arc::new(ServerPublisher::default()),
            agents: Arc::new(AgentLink {
                tx,
                sent: Mutex::new(Vec::new()),
            }),
            inbound: Mutex::new(Some(rx)),
        }
    }

    pub fn server(&self) -> Arc<ServerPublisher> {
        Arc::clone(&self.server)
    }

    pub fn agent_link(&self) -> Arc<AgentLink> {
        Arc::clone(&self.agents)
    }

    /// Inbox an agent controller reads server frames from.
    pub fn attach(&self, agent: &AgentIdentifier) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(64);
        self.server.inboxes.insert(agent.uuid.clone(), tx);
        rx
    }

    /// Feed agent frames to `handler` until `cancel` fires. Can be called once.
    pub fn serve(
        &self,
        handler: Arc<AgentRemoteHandler>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let mut inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .expect("loopback is already being served");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = inbound.recv() => match frame {
                        Some((agent, message)) => {
                            if let Err(e) = handler.process(&agent, message).await {
                                warn!(agent = %agent, error = %e, "Frame handling failed");
                            }
                        }
                        None => break,
                    },
                }
            }
        })
    }
}
