//! Frames over a real NATS server. Requires docker.

#![cfg(feature = "integration")]

use gantry_core::message::{Action, Message};
use gantry_core::ports::MessagePublisher;
use gantry_core::work::Work;
use gantry_nats::{NatsConfig, NatsTransport, Side};
use gantry_scheduler::{AgentFleet, AgentRemoteHandler, WorkAssignmentBroker};
use gantry_tests::containers::NatsContainer;
use gantry_tests::{ScriptedResolver, Step, agent, init_test_logging};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

async fn transports(nats: &NatsContainer) -> (NatsTransport, NatsTransport) {
    let config = NatsConfig::new(nats.url()).with_subject_prefix("it");
    let server = NatsTransport::connect(config.clone().with_client_name("server"), Side::Server)
        .await
        .unwrap();
    let agent = NatsTransport::connect(config.with_client_name("agent"), Side::Agent)
        .await
        .unwrap();
    (server, agent)
}

#[tokio::test]
async fn test_server_frames_reach_only_the_addressed_agent() {
    init_test_logging();
    let nats = NatsContainer::start().await.unwrap();
    let (server, agents) = transports(&nats).await;
    let first = agent("build-01");
    let second = agent("build-02");

    let mut first_inbox = agents.agent_inbox(&first).await.unwrap();
    let mut second_inbox = agents.agent_inbox(&second).await.unwrap();
    agents.flush().await.unwrap();

    let assign = Message::with_payload(Action::Assign, &Work::Sleep { millis: 10 }).unwrap();
    server.publish(&first, assign.clone()).await.unwrap();
    server.flush().await.unwrap();

    let received = timeout(WAIT, first_inbox.recv()).await.unwrap().unwrap();
    assert_eq!(received, assign);
    assert!(
        timeout(Duration::from_millis(200), second_inbox.recv())
            .await
            .is_err()
    );

    assert_eq!(server.metrics().snapshot().frames_published, 1);
    assert_eq!(agents.metrics().snapshot().frames_received, 1);
    assert!(server.is_connected());

    server.shutdown().await.unwrap();
    agents.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_agent_frames_carry_sender_identity() {
    let nats = NatsContainer::start().await.unwrap();
    let (server, agents) = transports(&nats).await;
    let me = agent("build-03");

    let mut inbound = server.server_inbound().await.unwrap();
    server.flush().await.unwrap();

    let idle = Message::new(Action::Idle, None);
    agents.publish(&me, idle.clone()).await.unwrap();
    agents.flush().await.unwrap();

    let envelope = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.agent, me);
    assert_eq!(envelope.message.ack_id(), idle.ack_id());
}

#[tokio::test]
async fn test_idle_agent_is_assigned_work_over_nats() {
    let nats = NatsContainer::start().await.unwrap();
    let (server, agents) = transports(&nats).await;
    let server = Arc::new(server);
    let me = agent("build-04");

    let resolver = ScriptedResolver::new();
    resolver.then(&me, Step::Work(Work::Sleep { millis: 25 }));
    let fleet = Arc::new(AgentFleet::new(
        Duration::from_secs(30),
        Arc::new(gantry_core::clock::SystemClock),
    ));
    fleet.register(me.clone());
    let broker = Arc::new(
        WorkAssignmentBroker::builder(resolver.clone(), server.clone())
            .fleet(fleet.clone())
            .build(),
    );
    let handler = AgentRemoteHandler::new(fleet, broker, server.clone());

    let mut inbound = server.server_inbound().await.unwrap();
    let mut inbox = agents.agent_inbox(&me).await.unwrap();
    server.flush().await.unwrap();
    agents.flush().await.unwrap();

    agents.publish(&me, Message::new(Action::Idle, None)).await.unwrap();
    let envelope = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    handler.process(&envelope.agent, envelope.message).await.unwrap();

    // The acknowledgement and the assignment race; collect both.
    let mut actions = Vec::new();
    let mut assigned = None;
    while assigned.is_none() {
        let frame = timeout(WAIT, inbox.recv()).await.unwrap().unwrap();
        actions.push(frame.action());
        if frame.action() == Action::Assign {
            assigned = frame.payload::<Work>().unwrap();
        }
    }

    assert_eq!(assigned, Some(Work::Sleep { millis: 25 }));
    assert_eq!(resolver.calls(), vec![me.clone()]);
    assert!(actions.contains(&Action::Assign));
}
