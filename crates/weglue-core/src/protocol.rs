//! Wire protocol frames
//!
//! The messaging backend speaks a bidirectional event channel over one
//! persistent connection. Frames are JSON objects tagged by an `event`
//! field, with camelCase payload keys:
//!
//! ```json
//! {"event":"send_message","id":"…","senderId":"…","conversationId":"…","text":"hi","timestamp":1700000000000}
//! ```
//!
//! Outbound frames are `ClientFrame`; inbound frames are `ServerFrame`.
//! Connection lifecycle (open/close/error, reconnection) is not expressed on
//! the wire; it belongs to the connection manager in `weglue-transport`.

use crate::identifiers::{ConversationId, MessageId, UserId};
use crate::message::{DeliveryState, Message};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Message payload as it travels on the wire.
///
/// Shared by `send_message` and `receive_message`; the broadcast echoes the
/// sender's payload shape exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Message identifier (client-minted on send).
    pub id: MessageId,
    /// Authoring participant.
    pub sender_id: UserId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Text payload.
    pub text: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: Timestamp,
}

impl WireMessage {
    /// Rehydrate a model message from a wire payload.
    pub fn into_message(self, delivery_state: DeliveryState) -> Message {
        Message {
            id: self.id,
            sender_id: self.sender_id,
            conversation_id: self.conversation_id,
            body: self.text,
            timestamp: self.timestamp,
            delivery_state,
        }
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            conversation_id: message.conversation_id,
            text: message.body.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Outbound events, client to backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Submit a message to a conversation.
    SendMessage(WireMessage),
}

/// Inbound events, backend to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message broadcast to this participant's conversations.
    ReceiveMessage(WireMessage),
    /// Acknowledgment of a `send_message`, correlated by the client id.
    #[serde(rename_all = "camelCase")]
    Ack {
        /// Client-minted id of the acknowledged send.
        message_id: MessageId,
        /// Server-issued id, when the backend re-keys the message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<MessageId>,
        /// Authoritative timestamp, when the backend assigns one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<Timestamp>,
    },
    /// Explicit backend rejection of a `send_message`.
    #[serde(rename_all = "camelCase")]
    Rejected {
        /// Client-minted id of the rejected send.
        message_id: MessageId,
        /// Human-readable rejection reason.
        reason: String,
    },
}

/// Named inbound event categories, the keys of the connection manager's
/// handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEventKind {
    /// `receive_message` frames.
    MessageReceived,
    /// `ack` frames.
    Ack,
    /// `rejected` frames.
    Rejected,
}

impl ServerFrame {
    /// The registry category this frame dispatches under.
    pub fn kind(&self) -> ServerEventKind {
        match self {
            ServerFrame::ReceiveMessage(_) => ServerEventKind::MessageReceived,
            ServerFrame::Ack { .. } => ServerEventKind::Ack,
            ServerFrame::Rejected { .. } => ServerEventKind::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_fixture() -> WireMessage {
        WireMessage {
            id: MessageId::default(),
            sender_id: UserId::default(),
            conversation_id: ConversationId::default(),
            text: "hello".to_string(),
            timestamp: Timestamp::from_millis(1_700_000_000_000),
        }
    }

    #[test]
    fn test_send_message_event_tag() {
        let frame = ClientFrame::SendMessage(wire_fixture());
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "send_message");
        assert_eq!(json["text"], "hello");
        assert!(json["senderId"].is_string());
        assert!(json["conversationId"].is_string());
    }

    #[test]
    fn test_receive_message_roundtrip() {
        let frame = ServerFrame::ReceiveMessage(wire_fixture());
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"receive_message\""));
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.kind(), ServerEventKind::MessageReceived);
    }

    #[test]
    fn test_ack_optional_fields_omitted() {
        let frame = ServerFrame::Ack {
            message_id: MessageId::default(),
            server_id: None,
            server_timestamp: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("serverId"));
        assert!(!json.contains("serverTimestamp"));
        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), ServerEventKind::Ack);
    }

    #[test]
    fn test_wire_message_into_message() {
        let wire = wire_fixture();
        let message = wire.clone().into_message(DeliveryState::Sent);
        assert_eq!(message.id, wire.id);
        assert_eq!(message.body, "hello");
        assert_eq!(message.delivery_state, DeliveryState::Sent);
    }
}
