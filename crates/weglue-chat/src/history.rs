//! History backend contract
//!
//! Opening a conversation hydrates its message sequence from whatever
//! persisted store the deployment provides. The core only needs a fetch;
//! writing history is the backend's own concern.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use weglue_core::{ConversationId, Message, Result};

/// Source of persisted conversation history.
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    /// Fetch the persisted history of a conversation, oldest first. Unknown
    /// conversations yield an empty sequence.
    async fn fetch(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;
}

/// In-memory history backend for tests and local demos.
#[derive(Default)]
pub struct InMemoryHistoryBackend {
    histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryHistoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the persisted history of a conversation.
    pub fn insert(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        self.histories.lock().insert(conversation_id, messages);
    }
}

#[async_trait]
impl HistoryBackend for InMemoryHistoryBackend {
    async fn fetch(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        Ok(self
            .histories
            .lock()
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
