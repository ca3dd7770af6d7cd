//! Message dispatcher
//!
//! Glue between the conversation store and the connection manager. Outbound:
//! validate, insert optimistically as `Pending`, emit, and resolve the
//! outcome (ack, rejection, transport failure, or timeout) into the stored
//! message's delivery state. Inbound: append broadcasts, reconciling the
//! echo of our own sends instead of duplicating them.
//!
//! Failures never propagate past this boundary as errors the presentation
//! layer must catch; they surface as `DeliveryState::Failed` on the message,
//! which the UI renders as a retry affordance.
//!
//! Retry policy: nothing is resent automatically. A message that fails while
//! the transport is down stays visibly `Failed` across reconnection;
//! recovery is an explicit [`MessageDispatcher::resend_message`], which
//! mints a fresh id and a fresh `Pending` message.

use crate::history::HistoryBackend;
use crate::session::UserSession;
use crate::store::{ConversationStore, Reconciliation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use weglue_core::{
    ClientFrame, ConversationId, DeliveryState, Message, MessageId, Result, ServerEventKind,
    ServerFrame, Timestamp, WeglueError, WireMessage,
};
use weglue_transport::{ConnectionManager, ServerEventHandler};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long a send may sit unacknowledged before it is failed, in
    /// milliseconds.
    pub ack_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 10_000,
        }
    }
}

impl DispatcherConfig {
    fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// The glue between user intents, the store, and the connection.
///
/// Constructed once with its collaborators injected; tests build a fresh
/// dispatcher + store + in-memory backend per case.
pub struct MessageDispatcher {
    store: Arc<ConversationStore>,
    connection: Arc<ConnectionManager>,
    session: Arc<UserSession>,
    history: Arc<dyn HistoryBackend>,
    config: DispatcherConfig,
    // Correlates acks/rejections (which carry only a message id) back to
    // the owning conversation.
    in_flight: Arc<Mutex<HashMap<MessageId, ConversationId>>>,
}

impl MessageDispatcher {
    /// Create a dispatcher. Call [`attach`](Self::attach) to start receiving
    /// inbound events.
    pub fn new(
        store: Arc<ConversationStore>,
        connection: Arc<ConnectionManager>,
        session: Arc<UserSession>,
        history: Arc<dyn HistoryBackend>,
        config: DispatcherConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            connection,
            session,
            history,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Register this dispatcher for every inbound event category on the
    /// connection manager.
    pub fn attach(self: &Arc<Self>) {
        let handler: Arc<dyn ServerEventHandler> = self.clone();
        self.connection
            .on(ServerEventKind::MessageReceived, Arc::clone(&handler));
        self.connection.on(ServerEventKind::Ack, Arc::clone(&handler));
        self.connection.on(ServerEventKind::Rejected, handler);
    }

    /// Send a message to a conversation.
    ///
    /// Rejects bodies that are empty after trimming with
    /// [`WeglueError::EmptyMessage`], before any store mutation. Otherwise
    /// the message is appended `Pending` synchronously and emitted; an emit
    /// failure marks it `Failed` in the store rather than erroring, so the
    /// caller always gets the message back and observes the outcome through
    /// its delivery state.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        body: &str,
    ) -> Result<Message> {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(WeglueError::EmptyMessage);
        }
        let sender_id = self.session.user_id()?;

        let message = Message {
            id: MessageId::new(),
            sender_id,
            conversation_id,
            body: trimmed.to_string(),
            timestamp: Timestamp::now(),
            delivery_state: DeliveryState::Pending,
        };
        self.store.append_message(message.clone());
        self.in_flight.lock().insert(message.id, conversation_id);

        let frame = ClientFrame::SendMessage(WireMessage::from(&message));
        match self.connection.emit(frame).await {
            Ok(()) => {
                debug!(message_id = %message.id, %conversation_id, "message emitted");
                self.spawn_ack_timeout(conversation_id, message.id);
                Ok(message)
            }
            Err(err) => {
                warn!(message_id = %message.id, %err, "emit failed; marking message failed");
                self.in_flight.lock().remove(&message.id);
                let failed = self
                    .store
                    .reconcile(conversation_id, message.id, Reconciliation::failed())
                    .unwrap_or_else(|| {
                        let mut copy = message.clone();
                        copy.delivery_state = DeliveryState::Failed;
                        copy
                    });
                Ok(failed)
            }
        }
    }

    /// Resubmit a failed message as a new `Pending` message with a new id.
    ///
    /// The failed original is removed from the store; `Sent` and `Pending`
    /// messages are not resendable.
    pub async fn resend_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Result<Message> {
        let original = self
            .store
            .message(&conversation_id, &message_id)
            .ok_or_else(|| {
                WeglueError::not_found(format!("message {message_id} in {conversation_id}"))
            })?;
        if original.delivery_state != DeliveryState::Failed {
            return Err(WeglueError::invalid("only failed messages can be resent"));
        }
        self.store.remove_message(conversation_id, message_id);
        self.send_message(conversation_id, &original.body).await
    }

    /// Hydrate a conversation's history from the persisted backend,
    /// replacing whatever the store currently holds for it.
    pub async fn hydrate(&self, conversation_id: ConversationId) -> Result<()> {
        let messages = self.history.fetch(conversation_id).await?;
        self.store.set_history(conversation_id, messages);
        Ok(())
    }

    fn spawn_ack_timeout(&self, conversation_id: ConversationId, message_id: MessageId) {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.config.ack_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let still_pending = matches!(
                store.message(&conversation_id, &message_id),
                Some(m) if m.delivery_state == DeliveryState::Pending
            );
            if still_pending {
                warn!(%message_id, "ack timed out; marking message failed");
                in_flight.lock().remove(&message_id);
                store.reconcile(conversation_id, message_id, Reconciliation::failed());
            }
        });
    }

    fn handle_receive(&self, wire: WireMessage) {
        let conversation_id = wire.conversation_id;
        if self.store.message(&conversation_id, &wire.id).is_some() {
            // Echo of our own optimistic send; reconcile, don't duplicate.
            debug!(message_id = %wire.id, "inbound echo reconciled");
            self.in_flight.lock().remove(&wire.id);
            self.store.reconcile(
                conversation_id,
                wire.id,
                Reconciliation::sent().with_server_timestamp(Some(wire.timestamp)),
            );
        } else {
            self.store
                .append_message(wire.into_message(DeliveryState::Sent));
        }
    }

    fn handle_ack(
        &self,
        message_id: MessageId,
        server_id: Option<MessageId>,
        server_timestamp: Option<Timestamp>,
    ) {
        let conversation_id = self.in_flight.lock().remove(&message_id);
        let Some(conversation_id) = conversation_id else {
            debug!(%message_id, "ack for unknown send; ignoring");
            return;
        };
        let reconciliation = Reconciliation::sent()
            .with_server_id(server_id)
            .with_server_timestamp(server_timestamp);
        if self
            .store
            .reconcile(conversation_id, message_id, reconciliation)
            .is_none()
        {
            debug!(%message_id, "acked message no longer in store");
        }
    }

    fn handle_rejected(&self, message_id: MessageId, reason: &str) {
        let conversation_id = self.in_flight.lock().remove(&message_id);
        let Some(conversation_id) = conversation_id else {
            debug!(%message_id, "rejection for unknown send; ignoring");
            return;
        };
        warn!(%message_id, reason, "send rejected by backend");
        self.store
            .reconcile(conversation_id, message_id, Reconciliation::failed());
    }
}

#[async_trait]
impl ServerEventHandler for MessageDispatcher {
    async fn handle_event(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::ReceiveMessage(wire) => self.handle_receive(wire),
            ServerFrame::Ack {
                message_id,
                server_id,
                server_timestamp,
            } => self.handle_ack(message_id, server_id, server_timestamp),
            ServerFrame::Rejected { message_id, reason } => {
                self.handle_rejected(message_id, &reason)
            }
        }
    }
}
