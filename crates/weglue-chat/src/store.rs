//! Conversation store
//!
//! Process-wide, in-memory message history keyed by conversation id, so an
//! open chat room reads its history in O(1) instead of scanning a global
//! message list. Append-mostly: the only reordering ever performed is
//! repositioning a single message when reconciliation assigns it an
//! authoritative server timestamp.
//!
//! Subscribers are an explicit observer list. Notification is synchronous,
//! fires after the mutation, and observes mutations in the order they
//! happened; a mutation and its notifications are atomic with respect to
//! other mutations. Callbacks must not call back into the store.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};
use weglue_core::{
    ConversationId, ConversationKind, ConversationSummary, DeliveryState, Message, MessageId,
    Timestamp, UserId,
};

/// What a subscriber observes.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A conversation entry was created or its kind changed.
    ConversationUpserted {
        /// The conversation affected.
        conversation_id: ConversationId,
        /// Its (new) inbox partition.
        kind: ConversationKind,
    },
    /// A new message entered a conversation's sequence.
    MessageAppended {
        /// The appended message.
        message: Message,
    },
    /// An existing message changed (delivery state, id, or timestamp).
    MessageUpdated {
        /// The message after the update.
        message: Message,
    },
    /// A message left a conversation's sequence (failed-send resubmission).
    MessageRemoved {
        /// The conversation affected.
        conversation_id: ConversationId,
        /// Id of the removed message.
        message_id: MessageId,
    },
    /// A conversation's history was replaced wholesale.
    HistoryReplaced {
        /// The conversation affected.
        conversation_id: ConversationId,
    },
    /// A conversation's unread counter was cleared.
    MarkedRead {
        /// The conversation affected.
        conversation_id: ConversationId,
    },
}

impl StoreEvent {
    /// The conversation this event concerns.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            StoreEvent::ConversationUpserted {
                conversation_id, ..
            }
            | StoreEvent::MessageRemoved {
                conversation_id, ..
            }
            | StoreEvent::HistoryReplaced { conversation_id }
            | StoreEvent::MarkedRead { conversation_id } => *conversation_id,
            StoreEvent::MessageAppended { message } | StoreEvent::MessageUpdated { message } => {
                message.conversation_id
            }
        }
    }
}

/// What a subscription observes: one conversation, or every mutation
/// (inbox-level views).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// Events for a single conversation.
    Conversation(ConversationId),
    /// Events for all conversations.
    Global,
}

impl SubscriptionScope {
    fn matches(&self, conversation_id: ConversationId) -> bool {
        match self {
            SubscriptionScope::Conversation(id) => *id == conversation_id,
            SubscriptionScope::Global => true,
        }
    }
}

/// Handle returned by [`ConversationStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Targeted update applied to one stored message during reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Delivery state to transition to.
    pub delivery_state: DeliveryState,
    /// Server-issued id replacing the client-minted one, when re-keyed.
    pub server_id: Option<MessageId>,
    /// Authoritative timestamp superseding the client's.
    pub server_timestamp: Option<Timestamp>,
}

impl Reconciliation {
    /// Acknowledged: transition to `Sent`.
    pub fn sent() -> Self {
        Self {
            delivery_state: DeliveryState::Sent,
            server_id: None,
            server_timestamp: None,
        }
    }

    /// Failed: transition to `Failed`.
    pub fn failed() -> Self {
        Self {
            delivery_state: DeliveryState::Failed,
            server_id: None,
            server_timestamp: None,
        }
    }

    /// Adopt a server-issued id.
    pub fn with_server_id(mut self, id: Option<MessageId>) -> Self {
        self.server_id = id;
        self
    }

    /// Adopt an authoritative timestamp.
    pub fn with_server_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.server_timestamp = timestamp;
        self
    }
}

struct ConversationEntry {
    kind: ConversationKind,
    messages: Vec<Message>,
    unread: u64,
}

impl ConversationEntry {
    fn new(kind: ConversationKind) -> Self {
        Self {
            kind,
            messages: Vec::new(),
            unread: 0,
        }
    }
}

type Callback = Box<dyn Fn(&StoreEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    scope: SubscriptionScope,
    callback: Callback,
}

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<ConversationId, ConversationEntry>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl Default for ConversationEntry {
    fn default() -> Self {
        Self::new(ConversationKind::DirectMessage)
    }
}

/// The process-wide conversation table.
///
/// Created once at application start (after login, so the owner is known)
/// and injected wherever history is read or written. Its lifetime outlives
/// every screen; closing a chat room merely unsubscribes that screen's
/// callback.
pub struct ConversationStore {
    owner: UserId,
    inner: Mutex<StoreInner>,
}

impl ConversationStore {
    /// Create an empty store owned by the local user. Messages authored by
    /// `owner` never count toward unread totals.
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    /// The local user this store counts unread messages against.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Current known history for a conversation; empty if unknown.
    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.inner
            .lock()
            .conversations
            .get(conversation_id)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    /// Look up one message by id within a conversation.
    pub fn message(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Option<Message> {
        self.inner
            .lock()
            .conversations
            .get(conversation_id)?
            .messages
            .iter()
            .find(|m| m.id == *message_id)
            .cloned()
    }

    /// Messages appended since the conversation was last marked read.
    pub fn unread(&self, conversation_id: &ConversationId) -> u64 {
        self.inner
            .lock()
            .conversations
            .get(conversation_id)
            .map(|entry| entry.unread)
            .unwrap_or(0)
    }

    /// Create a conversation entry, or update the kind of an existing one.
    pub fn upsert_conversation(&self, conversation_id: ConversationId, kind: ConversationKind) {
        let mut inner = self.inner.lock();
        inner
            .conversations
            .entry(conversation_id)
            .or_insert_with(|| ConversationEntry::new(kind))
            .kind = kind;
        notify(
            &inner,
            &StoreEvent::ConversationUpserted {
                conversation_id,
                kind,
            },
        );
    }

    /// Insert a message into its conversation's sequence.
    ///
    /// The entry is created lazily on first message. Idempotent on message
    /// id: an existing message with the same id is replaced in place rather
    /// than duplicated; this is how an optimistic `Pending` message and its
    /// `Sent` echo collapse into one. Appends of unique ids preserve
    /// insertion order.
    pub fn append_message(&self, message: Message) {
        let mut inner = self.inner.lock();
        let owner = self.owner;
        let entry = inner
            .conversations
            .entry(message.conversation_id)
            .or_default();

        let event = if let Some(idx) = entry.messages.iter().position(|m| m.id == message.id) {
            let existing = &entry.messages[idx];
            if existing.sender_id != message.sender_id || existing.body != message.body {
                // Id collision with materially different fields; reconcile
                // anyway, but leave a trace for diagnosis.
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    "duplicate id with differing fields; replacing"
                );
            }
            let timestamp_changed = existing.timestamp != message.timestamp;
            entry.messages[idx] = message.clone();
            if timestamp_changed {
                reposition(&mut entry.messages, idx);
            }
            StoreEvent::MessageUpdated { message }
        } else {
            if message.sender_id != owner {
                entry.unread += 1;
            }
            entry.messages.push(message.clone());
            StoreEvent::MessageAppended { message }
        };
        notify(&inner, &event);
    }

    /// Replace a conversation's sequence wholesale (history hydration).
    /// Resets the unread counter; the kind of an existing entry is kept.
    pub fn set_history(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        let mut inner = self.inner.lock();
        let entry = inner.conversations.entry(conversation_id).or_default();
        entry.messages = messages;
        entry.unread = 0;
        notify(&inner, &StoreEvent::HistoryReplaced { conversation_id });
    }

    /// Apply a targeted reconciliation to one stored message.
    ///
    /// Returns the message as stored afterwards, or `None` when no message
    /// with `message_id` exists in the conversation. When a server-issued id
    /// is adopted and a message under that id already exists (the broadcast
    /// echo arrived before the ack), the optimistic original is dropped and
    /// the echo kept, never both.
    pub fn reconcile(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        reconciliation: Reconciliation,
    ) -> Option<Message> {
        let mut inner = self.inner.lock();
        let entry = inner.conversations.get_mut(&conversation_id)?;
        let idx = entry.messages.iter().position(|m| m.id == message_id)?;

        if let Some(server_id) = reconciliation.server_id.filter(|id| *id != message_id) {
            if let Some(echo_idx) = entry.messages.iter().position(|m| m.id == server_id) {
                // Echo won the race; the optimistic copy is redundant.
                debug!(%message_id, %server_id, "dropping optimistic copy in favor of echo");
                entry.messages.remove(idx);
                let echo_idx = if idx < echo_idx { echo_idx - 1 } else { echo_idx };
                entry.messages[echo_idx].delivery_state = reconciliation.delivery_state;
                let updated = entry.messages[echo_idx].clone();
                notify(
                    &inner,
                    &StoreEvent::MessageRemoved {
                        conversation_id,
                        message_id,
                    },
                );
                notify(
                    &inner,
                    &StoreEvent::MessageUpdated {
                        message: updated.clone(),
                    },
                );
                return Some(updated);
            }
            entry.messages[idx].id = server_id;
        }

        entry.messages[idx].delivery_state = reconciliation.delivery_state;
        let mut idx = idx;
        if let Some(timestamp) = reconciliation.server_timestamp {
            if entry.messages[idx].timestamp != timestamp {
                entry.messages[idx].timestamp = timestamp;
                idx = reposition(&mut entry.messages, idx);
            }
        }
        let updated = entry.messages[idx].clone();
        notify(
            &inner,
            &StoreEvent::MessageUpdated {
                message: updated.clone(),
            },
        );
        Some(updated)
    }

    /// Remove a message from its conversation (failed-send resubmission).
    pub fn remove_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Option<Message> {
        let mut inner = self.inner.lock();
        let entry = inner.conversations.get_mut(&conversation_id)?;
        let idx = entry.messages.iter().position(|m| m.id == message_id)?;
        let removed = entry.messages.remove(idx);
        notify(
            &inner,
            &StoreEvent::MessageRemoved {
                conversation_id,
                message_id,
            },
        );
        Some(removed)
    }

    /// Clear a conversation's unread counter.
    pub fn mark_read(&self, conversation_id: ConversationId) {
        let mut inner = self.inner.lock();
        match inner.conversations.get_mut(&conversation_id) {
            Some(entry) => entry.unread = 0,
            None => {
                debug!(%conversation_id, "mark_read on unknown conversation");
                return;
            }
        }
        notify(&inner, &StoreEvent::MarkedRead { conversation_id });
    }

    /// Inbox projection: one summary per conversation, most recent activity
    /// first, optionally restricted to one inbox partition.
    pub fn summaries(&self, filter: Option<ConversationKind>) -> Vec<ConversationSummary> {
        let inner = self.inner.lock();
        let mut summaries: Vec<ConversationSummary> = inner
            .conversations
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |kind| entry.kind == kind))
            .map(|(&conversation_id, entry)| ConversationSummary {
                conversation_id,
                kind: entry.kind,
                last_message: entry.messages.last().cloned(),
                unread: entry.unread,
            })
            .collect();
        summaries.sort_by_key(|summary| {
            std::cmp::Reverse(summary.last_message.as_ref().map(|m| m.timestamp))
        });
        summaries
    }

    /// Register a callback observing mutations in `scope`.
    ///
    /// The callback fires synchronously after each matching mutation, in
    /// mutation order. It must not call back into the store.
    pub fn subscribe<F>(&self, scope: SubscriptionScope, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner.subscribers.push(Subscriber {
            id,
            scope,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a subscription. Unknown ids are ignored (a screen may
    /// unsubscribe after the store was reset underneath it).
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().subscribers.retain(|s| s.id != id);
    }
}

fn notify(inner: &StoreInner, event: &StoreEvent) {
    let conversation_id = event.conversation_id();
    for subscriber in &inner.subscribers {
        if subscriber.scope.matches(conversation_id) {
            (subscriber.callback)(event);
        }
    }
}

/// Re-insert `messages[idx]` at its timestamp-ordered position, keeping the
/// relative order of equal timestamps. Returns the new index.
fn reposition(messages: &mut Vec<Message>, idx: usize) -> usize {
    let message = messages.remove(idx);
    let pos = messages
        .iter()
        .position(|m| m.timestamp > message.timestamp)
        .unwrap_or(messages.len());
    messages.insert(pos, message);
    pos
}
