//! Message and conversation model
//!
//! A `Message` belongs to exactly one conversation for its lifetime and
//! carries a tagged delivery state rather than a boolean "sent" flag, so the
//! presentation layer can render pending spinners and retry affordances from
//! the same field the dispatcher drives.

use crate::identifiers::{ConversationId, MessageId, UserId};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// Delivery progress of a single send attempt.
///
/// `Sent` and `Failed` are terminal for a given attempt; a failed message is
/// resubmitted as a new `Pending` message with a new id, never resurrected
/// in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Inserted optimistically, backend acknowledgment outstanding.
    Pending,
    /// Acknowledged by the backend (or received from another participant).
    Sent,
    /// Emit failed, the backend rejected the send, or the ack timed out.
    Failed,
}

impl DeliveryState {
    /// Whether this state accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Sent | DeliveryState::Failed)
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique message identifier.
    pub id: MessageId,
    /// Authoring participant.
    pub sender_id: UserId,
    /// Owning conversation; fixed for the message's lifetime.
    pub conversation_id: ConversationId,
    /// Text payload, trimmed and non-empty (enforced at the send boundary).
    pub body: String,
    /// Creation time; client-assigned, superseded by the server's on ack.
    pub timestamp: Timestamp,
    /// Delivery progress of this message.
    pub delivery_state: DeliveryState,
}

impl Message {
    /// Build a fresh pending message for an optimistic send.
    pub fn pending(
        sender_id: UserId,
        conversation_id: ConversationId,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender_id,
            conversation_id,
            body: body.into(),
            timestamp: Timestamp::now(),
            delivery_state: DeliveryState::Pending,
        }
    }
}

/// Partition of the inbox presentation.
///
/// Does not affect delivery semantics; a group message and a direct message
/// travel the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationKind {
    /// 1:1 thread between two participants.
    DirectMessage,
    /// Club group chat.
    ClubGroup,
}

/// Inbox-level projection of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub conversation_id: ConversationId,
    /// Inbox partition this conversation renders under.
    pub kind: ConversationKind,
    /// Most recent message, if any history is known.
    pub last_message: Option<Message>,
    /// Messages appended since the conversation was last marked read.
    pub unread: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_constructor() {
        let sender = UserId::new();
        let conversation = ConversationId::new();
        let message = Message::pending(sender, conversation, "hello");
        assert_eq!(message.delivery_state, DeliveryState::Pending);
        assert_eq!(message.sender_id, sender);
        assert_eq!(message.conversation_id, conversation);
        assert!(!message.delivery_state.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryState::Sent.is_terminal());
        assert!(DeliveryState::Failed.is_terminal());
        assert!(!DeliveryState::Pending.is_terminal());
    }
}
