//! Subject layout.
//!
//! Server to agent: `{prefix}.agent.{uuid}.inbox`.
//! Agent to server: `{prefix}.agent.{uuid}.server`.

use gantry_core::message::Message;
use gantry_core::{AgentIdentifier, Error, Result};
use serde::{Deserialize, Serialize};

const INBOX: &str = "inbox";
const SERVER: &str = "server";

pub fn agent_inbox(prefix: &str, uuid: &str) -> Result<String> {
    Ok(format!("{}.agent.{}.{}", prefix, token(uuid)?, INBOX))
}

pub fn agent_to_server(prefix: &str, uuid: &str) -> Result<String> {
    Ok(format!("{}.agent.{}.{}", prefix, token(uuid)?, SERVER))
}

/// Wildcard matching every agent's server-bound subject.
pub fn all_agents_to_server(prefix: &str) -> String {
    format!("{}.agent.*.{}", prefix, SERVER)
}

/// The agent uuid a server-bound subject was published on.
pub fn uuid_from_server_subject<'a>(prefix: &str, subject: &'a str) -> Option<&'a str> {
    let uuid = subject
        .strip_prefix(prefix)?
        .strip_prefix(".agent.")?
        .strip_suffix(SERVER)?
        .strip_suffix('.')?;
    token(uuid).ok()
}

fn token(uuid: &str) -> Result<&str> {
    let valid = !uuid.is_empty()
        && !uuid
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if valid {
        Ok(uuid)
    } else {
        Err(Error::InvalidArgument(format!(
            "agent uuid '{}' cannot be used as a subject token",
            uuid
        )))
    }
}

/// A server-bound frame together with the identity of the agent that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEnvelope {
    pub agent: AgentIdentifier,
    pub message: Message,
}

impl AgentEnvelope {
    pub fn new(agent: AgentIdentifier, message: Message) -> Self {
        Self { agent, message }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode a frame received on `subject`, rejecting one whose claimed
    /// sender differs from the agent the subject belongs to.
    pub fn decode_from(prefix: &str, subject: &str, bytes: &[u8]) -> Result<Self> {
        let envelope = Self::decode(bytes)?;
        match uuid_from_server_subject(prefix, subject) {
            Some(uuid) if uuid == envelope.agent.uuid => Ok(envelope),
            _ => Err(Error::InvalidArgument(format!(
                "frame from agent '{}' arrived on {}",
                envelope.agent.uuid, subject
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::message::Action;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subjects() {
        assert_eq!(agent_inbox("gantry", "a-1").unwrap(), "gantry.agent.a-1.inbox");
        assert_eq!(agent_to_server("ci", "a-1").unwrap(), "ci.agent.a-1.server");
        assert_eq!(all_agents_to_server("ci"), "ci.agent.*.server");
    }

    #[test]
    fn test_uuid_must_be_a_single_token() {
        assert!(agent_inbox("gantry", "a.b").is_err());
        assert!(agent_inbox("gantry", "*").is_err());
        assert!(agent_to_server("gantry", "").is_err());
        assert!(agent_to_server("gantry", "has space").is_err());
    }

    #[test]
    fn test_uuid_from_server_subject() {
        assert_eq!(uuid_from_server_subject("ci", "ci.agent.a-1.server"), Some("a-1"));
        assert_eq!(uuid_from_server_subject("ci", "ci.agent.a-1.inbox"), None);
        assert_eq!(uuid_from_server_subject("ci", "other.agent.a-1.server"), None);
        assert_eq!(uuid_from_server_subject("ci", "ci.agent..server"), None);
    }

    #[test]
    fn test_envelope_must_match_subject_agent() {
        let impostor = AgentIdentifier::new("h", "10.0.0.2", "a-2");
        let bytes = AgentEnvelope::new(impostor, Message::new(Action::Idle, None))
            .encode()
            .unwrap();

        assert!(AgentEnvelope::decode_from("ci", "ci.agent.a-2.server", &bytes).is_ok());
        assert!(AgentEnvelope::decode_from("ci", "ci.agent.a-1.server", &bytes).is_err());
    }

    #[test]
    fn test_envelope_keeps_ack_id() {
        let message = Message::new(Action::Idle, None);
        let agent = AgentIdentifier::new("h", "10.0.0.1", "a-1");
        let envelope = AgentEnvelope::new(agent, message.clone());

        let decoded = AgentEnvelope::decode(&envelope.encode().unwrap()).unwrap();

        assert_eq!(decoded.message.ack_id(), message.ack_id());
        assert_eq!(decoded.agent.uuid, "a-1");
    }
}
