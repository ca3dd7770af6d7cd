//! In-process backend simulator
//!
//! `MemoryBackend` stands in for the messaging backend in tests and local
//! demos: it accepts any number of client sessions, acknowledges each
//! `send_message` with a server timestamp, and broadcasts the message to the
//! other connected sessions. Knobs exist for the behaviors the dispatcher
//! must reconcile against: echoing the broadcast back to the sender,
//! re-keying messages with server-issued ids, refusing connections, and
//! severing every live session to simulate a transport drop.

use crate::traits::{Transport, TransportSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use weglue_core::{
    ClientFrame, MessageId, Result, ServerFrame, Timestamp, WeglueError, WireMessage,
};

#[derive(Default)]
struct BackendInner {
    next_session: u64,
    sessions: HashMap<u64, mpsc::UnboundedSender<ServerFrame>>,
    refuse_connections: bool,
    echo_to_sender: bool,
    assign_server_ids: bool,
    drop_acks: bool,
}

impl BackendInner {
    fn handle_send(&mut self, from: u64, wire: WireMessage) {
        let server_timestamp = Timestamp::now();
        let server_id = self.assign_server_ids.then(MessageId::new);

        if !self.drop_acks {
            if let Some(origin) = self.sessions.get(&from) {
                let _ = origin.send(ServerFrame::Ack {
                    message_id: wire.id,
                    server_id,
                    server_timestamp: Some(server_timestamp),
                });
            }
        }

        // Other participants see the reconciled payload, not the client's.
        let broadcast = WireMessage {
            id: server_id.unwrap_or(wire.id),
            timestamp: server_timestamp,
            ..wire
        };
        for (&session_id, sender) in &self.sessions {
            if session_id == from && !self.echo_to_sender {
                continue;
            }
            let _ = sender.send(ServerFrame::ReceiveMessage(broadcast.clone()));
        }
    }
}

/// In-process messaging backend for tests and local demos.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<BackendInner>>,
}

impl MemoryBackend {
    /// Create an empty backend accepting connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport handle that connects to this backend.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            inner: Arc::clone(&self.inner),
        }
    }

    /// When set, new connection attempts fail until cleared.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner.lock().refuse_connections = refuse;
    }

    /// When set, the broadcast of a send is also delivered to its sender
    /// (the echo path the dispatcher reconciles instead of duplicating).
    pub fn set_echo_to_sender(&self, echo: bool) {
        self.inner.lock().echo_to_sender = echo;
    }

    /// When set, acks carry a fresh server-issued id for each send.
    pub fn set_assign_server_ids(&self, assign: bool) {
        self.inner.lock().assign_server_ids = assign;
    }

    /// When set, sends are broadcast but never acknowledged (for exercising
    /// ack-timeout behavior).
    pub fn set_drop_acks(&self, drop: bool) {
        self.inner.lock().drop_acks = drop;
    }

    /// Tear down every live session, as an unexpected transport drop would.
    pub fn sever_connections(&self) {
        self.inner.lock().sessions.clear();
    }

    /// Deliver an arbitrary frame to every connected session.
    pub fn inject(&self, frame: ServerFrame) {
        for sender in self.inner.lock().sessions.values() {
            let _ = sender.send(frame.clone());
        }
    }

    /// Number of currently connected sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

/// Transport handle bound to a [`MemoryBackend`].
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<BackendInner>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>> {
        let mut inner = self.inner.lock();
        if inner.refuse_connections {
            return Err(WeglueError::transport("connection refused"));
        }
        let session_id = inner.next_session;
        inner.next_session += 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.sessions.insert(session_id, sender);
        drop(inner);

        Ok(Box::new(MemorySession {
            session_id,
            inner: Arc::clone(&self.inner),
            receiver: tokio::sync::Mutex::new(receiver),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}

struct MemorySession {
    session_id: u64,
    inner: Arc<Mutex<BackendInner>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerFrame>>,
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn send(&self, frame: ClientFrame) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.sessions.contains_key(&self.session_id) {
            return Err(WeglueError::transport("session closed"));
        }
        match frame {
            ClientFrame::SendMessage(wire) => inner.handle_send(self.session_id, wire),
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Option<ServerFrame>> {
        let mut receiver = self.receiver.lock().await;
        Ok(receiver.recv().await)
    }

    async fn close(&self) -> Result<()> {
        self.inner.lock().sessions.remove(&self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use weglue_core::{ConversationId, UserId};

    fn wire(text: &str) -> WireMessage {
        WireMessage {
            id: MessageId::new(),
            sender_id: UserId::new(),
            conversation_id: ConversationId::new(),
            text: text.to_string(),
            timestamp: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn test_send_acks_sender_and_broadcasts_to_others() {
        let backend = MemoryBackend::new();
        let alice = backend.transport().connect().await.unwrap();
        let bob = backend.transport().connect().await.unwrap();

        let payload = wire("hi bob");
        alice
            .send(ClientFrame::SendMessage(payload.clone()))
            .await
            .unwrap();

        let ack = alice.recv().await.unwrap().unwrap();
        assert_matches!(ack, ServerFrame::Ack { message_id, .. } if message_id == payload.id);

        let received = bob.recv().await.unwrap().unwrap();
        assert_matches!(
            received,
            ServerFrame::ReceiveMessage(broadcast) if broadcast.id == payload.id && broadcast.text == "hi bob"
        );
    }

    #[tokio::test]
    async fn test_echo_to_sender_delivers_broadcast_back() {
        let backend = MemoryBackend::new();
        backend.set_echo_to_sender(true);
        let alice = backend.transport().connect().await.unwrap();

        let payload = wire("echo me");
        alice
            .send(ClientFrame::SendMessage(payload.clone()))
            .await
            .unwrap();

        // Ack first, then the echoed broadcast.
        assert_matches!(alice.recv().await.unwrap().unwrap(), ServerFrame::Ack { .. });
        let echoed = alice.recv().await.unwrap().unwrap();
        assert_matches!(
            echoed,
            ServerFrame::ReceiveMessage(broadcast) if broadcast.id == payload.id
        );
    }

    #[tokio::test]
    async fn test_sever_ends_sessions() {
        let backend = MemoryBackend::new();
        let alice = backend.transport().connect().await.unwrap();
        assert_eq!(backend.session_count(), 1);

        backend.sever_connections();
        assert_eq!(backend.session_count(), 0);
        assert_eq!(alice.recv().await.unwrap(), None);
        let err = alice
            .send(ClientFrame::SendMessage(wire("too late")))
            .await
            .unwrap_err();
        assert_matches!(err, WeglueError::Transport { .. });
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let backend = MemoryBackend::new();
        backend.set_refuse_connections(true);
        let err = backend.transport().connect().await.err().unwrap();
        assert_matches!(err, WeglueError::Transport { .. });
    }

    #[tokio::test]
    async fn test_server_assigned_ids_rekey_broadcast() {
        let backend = MemoryBackend::new();
        backend.set_assign_server_ids(true);
        let alice = backend.transport().connect().await.unwrap();
        let bob = backend.transport().connect().await.unwrap();

        let payload = wire("rekey");
        alice
            .send(ClientFrame::SendMessage(payload.clone()))
            .await
            .unwrap();

        let ack = alice.recv().await.unwrap().unwrap();
        let server_id = match ack {
            ServerFrame::Ack {
                message_id,
                server_id,
                ..
            } => {
                assert_eq!(message_id, payload.id);
                server_id.unwrap()
            }
            other => panic!("expected ack, got {other:?}"),
        };
        assert_ne!(server_id, payload.id);

        let received = bob.recv().await.unwrap().unwrap();
        assert_matches!(
            received,
            ServerFrame::ReceiveMessage(broadcast) if broadcast.id == server_id
        );
    }
}
