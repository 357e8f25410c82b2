//! Protocol frames exchanged between server and agents.

use crate::console::ConsoleTransmission;
use crate::ids::AckId;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Closed set of frame kinds shared by agent and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Agent announces itself; the payload is its `AgentIdentifier`.
    Register,
    Ping,
    Idle,
    Assign,
    Acknowledge,
    CancelBuild,
    ReportCurrentStatus,
    ReportCompleting,
    ReportCompleted,
    ConsoleOut,
    Reregister,
}

/// One logical event on the wire.
///
/// The ack id is generated on construction and cannot be supplied, so every
/// frame is independently identifiable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    ack_id: AckId,
}

impl Message {
    pub fn new(action: Action, data: Option<String>) -> Self {
        Self {
            action,
            data,
            ack_id: AckId::generate(),
        }
    }

    /// Frame whose payload is `value` encoded as JSON.
    pub fn with_payload<T: Serialize>(action: Action, value: &T) -> Result<Self> {
        Ok(Self::new(action, Some(serde_json::to_string(value)?)))
    }

    /// `Acknowledge` reply carrying this frame's ack id as data.
    pub fn acknowledge(&self) -> Self {
        Self::new(Action::Acknowledge, Some(self.ack_id.to_string()))
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn ack_id(&self) -> AckId {
        self.ack_id
    }

    /// Decode the data field as JSON.
    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>> {
        self.data
            .as_deref()
            .map(serde_json::from_str::<T>)
            .transpose()
            .map_err(Into::into)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Payload of a `ConsoleOut` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleBatch {
    pub transmissions: Vec<ConsoleTransmission>,
}

impl ConsoleBatch {
    pub fn new(transmissions: Vec<ConsoleTransmission>) -> Self {
        Self { transmissions }
    }

    pub fn is_empty(&self) -> bool {
        self.transmissions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transmissions.len()
    }

    /// Concatenated rendering of every transmission.
    pub fn render(&self) -> String {
        self.transmissions.iter().map(|t| t.render()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_messages_have_distinct_ack_ids() {
        let a = Message::new(Action::Ping, None);
        let b = Message::new(Action::Ping, None);
        assert_ne!(a.ack_id(), b.ack_id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let a = Message::new(Action::Idle, Some("x".to_string()));
        let copy = a.clone();
        assert_eq!(a, copy);
    }

    #[test]
    fn test_acknowledge_references_original() {
        let original = Message::new(Action::ConsoleOut, Some("batch".to_string()));
        let ack = original.acknowledge();
        assert_eq!(ack.action(), Action::Acknowledge);
        assert_eq!(ack.data(), Some(original.ack_id().to_string().as_str()));
        assert_ne!(ack.ack_id(), original.ack_id());
    }

    #[test]
    fn test_wire_format() {
        let message = Message::new(Action::CancelBuild, None);
        let json: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();
        assert_eq!(json["action"], "cancelBuild");
        assert!(json.get("data").is_none());

        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_decode_rejects_unknown_action() {
        let bytes = br#"{"action":"selfDestruct","ack_id":"0190a0a0-0000-7000-8000-000000000000"}"#;
        assert!(Message::decode(bytes).is_err());
    }
}
