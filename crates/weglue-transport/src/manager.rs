//! Process-wide connection manager
//!
//! Owns at most one live [`TransportSession`] for the lifetime of the
//! application. Constructed once at startup and injected wherever the
//! connection is needed; screens and stores never open their own sessions.
//!
//! On an unexpected session loss the manager reconnects with exponential
//! backoff (1s base, doubling, 30s cap, indefinite attempts) until a session
//! is re-established or `disconnect()` is called. State transitions are
//! published over a `watch` channel so the dispatcher and presentation layer
//! can observe `Connected | Disconnected | Reconnecting` without polling.
//!
//! Inbound frames are delivered to registered handlers sequentially, in
//! arrival order; each handler runs to completion before the next frame is
//! dispatched.

use crate::config::ConnectionConfig;
use crate::traits::{Transport, TransportSession};
use async_trait::async_trait;
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use weglue_core::{ClientFrame, Result, ServerEventKind, ServerFrame, WeglueError};

/// Advisory connection state, published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in progress.
    Disconnected,
    /// A session is live.
    Connected,
    /// The session dropped unexpectedly; backoff retries are running.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Handler for one named category of inbound events.
#[async_trait]
pub trait ServerEventHandler: Send + Sync {
    /// Process one inbound frame. Runs to completion before the manager
    /// dispatches the next frame.
    async fn handle_event(&self, frame: ServerFrame);
}

/// The process-wide connection singleton.
///
/// Its lifecycle is independent of any screen: created at application start,
/// torn down at application end or explicit logout.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    handlers: SyncRwLock<HashMap<ServerEventKind, Arc<dyn ServerEventHandler>>>,
    session: RwLock<Option<Arc<dyn TransportSession>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    connect_gate: Mutex<()>,
    // Bumped by disconnect(); reader and reconnect tasks from an older
    // generation abandon themselves instead of racing a fresh session.
    generation: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager over the given transport. No session is opened
    /// until [`connect`](Self::connect).
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            config,
            handlers: SyncRwLock::new(HashMap::new()),
            session: RwLock::new(None),
            state_tx,
            state_rx,
            connect_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Establish the session if not already established.
    ///
    /// Idempotent: calling while connected (or while a reconnection loop is
    /// already working) is a no-op. Concurrent calls coalesce behind one
    /// attempt; two live sessions cannot result.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        if self.session.read().await.is_some() {
            debug!("connect while already connected; no-op");
            return Ok(());
        }
        if self.state() == ConnectionState::Reconnecting {
            debug!("connect while reconnection in progress; no-op");
            return Ok(());
        }
        let session = self.establish().await?;
        self.install_session(session).await;
        info!(
            transport = self.transport.transport_type(),
            "connected to messaging backend"
        );
        Ok(())
    }

    /// Tear down the session and stop any reconnection loop. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = self.session.write().await.take() {
            let _ = session.close().await;
        }
        if self.state() != ConnectionState::Disconnected {
            self.publish(ConnectionState::Disconnected);
            info!("disconnected from messaging backend");
        }
        Ok(())
    }

    /// Register the handler for a named inbound event category, replacing
    /// any previous registration.
    pub fn on(&self, kind: ServerEventKind, handler: Arc<dyn ServerEventHandler>) {
        self.handlers.write().insert(kind, handler);
    }

    /// Unregister the handler for an event category.
    pub fn off(&self, kind: ServerEventKind) {
        self.handlers.write().remove(&kind);
    }

    /// Send an outbound frame.
    ///
    /// Fails with [`WeglueError::NotConnected`] when no session is live; the
    /// manager never buffers. Queueing or surfacing the failure is the
    /// dispatcher's responsibility.
    pub async fn emit(&self, frame: ClientFrame) -> Result<()> {
        let session = self.session.read().await.clone();
        let session = session.ok_or(WeglueError::NotConnected)?;
        session.send(frame).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Whether a session is currently live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// A watch receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn publish(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    async fn establish(&self) -> Result<Arc<dyn TransportSession>> {
        let session = tokio::time::timeout(
            self.config.connect_timeout(),
            self.transport.connect(),
        )
        .await
        .map_err(|_| WeglueError::transport("connection attempt timed out"))??;
        Ok(Arc::from(session))
    }

    fn install_session(
        self: &Arc<Self>,
        session: Arc<dyn TransportSession>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            *self.session.write().await = Some(Arc::clone(&session));
            self.publish(ConnectionState::Connected);
            let generation = self.generation.load(Ordering::SeqCst);
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.run_reader(session, generation).await;
            });
        })
    }

    /// Pump inbound frames until the session ends, then hand off to the
    /// reconnection loop unless the end was an explicit disconnect.
    async fn run_reader(self: Arc<Self>, session: Arc<dyn TransportSession>, generation: u64) {
        loop {
            match session.recv().await {
                Ok(Some(frame)) => {
                    let handler = self.handlers.read().get(&frame.kind()).cloned();
                    match handler {
                        Some(handler) => handler.handle_event(frame).await,
                        None => debug!(kind = ?frame.kind(), "no handler registered; frame dropped"),
                    }
                }
                Ok(None) => {
                    info!("session closed by backend");
                    break;
                }
                Err(err) => {
                    warn!(%err, "session error");
                    break;
                }
            }
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            return; // explicit disconnect, nothing to recover
        }
        self.begin_reconnect(generation).await;
    }

    async fn begin_reconnect(self: Arc<Self>, generation: u64) {
        *self.session.write().await = None;
        self.publish(ConnectionState::Reconnecting);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let delay = self.config.backoff_delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "transport dropped; retrying"
            );
            tokio::time::sleep(delay).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match self.establish().await {
                Ok(session) => {
                    // Take the gate so a concurrent connect() cannot race
                    // this loop into two live sessions.
                    let _gate = self.connect_gate.lock().await;
                    if self.generation.load(Ordering::SeqCst) != generation
                        || self.session.read().await.is_some()
                    {
                        let _ = session.close().await;
                        return;
                    }
                    info!(attempt, "reconnected to messaging backend");
                    self.install_session(session).await;
                    return;
                }
                Err(err) => {
                    warn!(attempt, %err, "reconnection attempt failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use weglue_core::{ConversationId, MessageId, Timestamp, UserId, WireMessage};

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout_ms: 1_000,
            base_delay_ms: 10,
            max_delay_ms: 40,
            backoff_multiplier: 2.0,
        }
    }

    fn wire(text: &str) -> WireMessage {
        WireMessage {
            id: MessageId::new(),
            sender_id: UserId::new(),
            conversation_id: ConversationId::new(),
            text: text.to_string(),
            timestamp: Timestamp::now(),
        }
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<ConnectionState>,
        target: ConnectionState,
    ) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if *rx.borrow_and_update() == target {
                    return;
                }
                rx.changed().await.expect("state channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target}"));
    }

    struct Capture(mpsc::UnboundedSender<ServerFrame>);

    #[async_trait]
    impl ServerEventHandler for Capture {
        async fn handle_event(&self, frame: ServerFrame) {
            let _ = self.0.send(frame);
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(backend.session_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_concurrent_connects_coalesce() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());

        let a = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        let b = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(backend.session_count(), 1);
    }

    #[tokio::test]
    async fn test_emit_while_disconnected_fails() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());

        let err = manager
            .emit(ClientFrame::SendMessage(wire("nope")))
            .await
            .unwrap_err();
        assert_matches!(err, WeglueError::NotConnected);
    }

    #[tokio::test]
    async fn test_emit_reaches_backend() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        manager.connect().await.unwrap();

        // A second raw session stands in for another participant.
        let observer = backend.transport().connect().await.unwrap();

        manager
            .emit(ClientFrame::SendMessage(wire("hello")))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), observer.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_matches!(frame, ServerFrame::ReceiveMessage(w) if w.text == "hello");
    }

    #[tokio::test]
    async fn test_handler_receives_inbound_in_order() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.on(ServerEventKind::MessageReceived, Arc::new(Capture(tx)));
        manager.connect().await.unwrap();

        for text in ["one", "two", "three"] {
            backend.inject(ServerFrame::ReceiveMessage(wire(text)));
        }

        for expected in ["one", "two", "three"] {
            let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_matches!(frame, ServerFrame::ReceiveMessage(w) if w.text == expected);
        }
    }

    #[tokio::test]
    async fn test_off_unregisters_handler() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Keep the handler (and thus the sender) alive past `off` so the
        // channel stays open; otherwise `rx.recv()` returns `None` on the
        // closed channel instead of pending, and the timeout never fires.
        let handler = Arc::new(Capture(tx));
        manager.on(ServerEventKind::MessageReceived, handler.clone());
        manager.off(ServerEventKind::MessageReceived);
        manager.connect().await.unwrap();

        backend.inject(ServerFrame::ReceiveMessage(wire("dropped")));

        let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(outcome.is_err(), "handler should not have fired");
        drop(handler);
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_drop() {
        let backend = MemoryBackend::new();
        // Backoff wide enough that the Reconnecting transition is observable
        // before the first retry lands.
        let config = ConnectionConfig {
            base_delay_ms: 50,
            max_delay_ms: 100,
            ..fast_config()
        };
        let manager = ConnectionManager::new(Arc::new(backend.transport()), config);
        let mut states = manager.watch_state();
        manager.connect().await.unwrap();

        backend.sever_connections();
        wait_for_state(&mut states, ConnectionState::Reconnecting).await;
        wait_for_state(&mut states, ConnectionState::Connected).await;

        assert_eq!(backend.session_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_keeps_retrying_while_refused() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        let mut states = manager.watch_state();
        manager.connect().await.unwrap();

        backend.set_refuse_connections(true);
        backend.sever_connections();
        wait_for_state(&mut states, ConnectionState::Reconnecting).await;

        // Several backoff periods pass without a session.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(backend.session_count(), 0);

        backend.set_refuse_connections(false);
        wait_for_state(&mut states, ConnectionState::Connected).await;
        assert_eq!(backend.session_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_stops_recovery() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        manager.connect().await.unwrap();

        manager.disconnect().await.unwrap();
        manager.disconnect().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(backend.session_count(), 0);

        // No reconnection loop should revive the session.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(backend.session_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_during_reconnect_cancels_loop() {
        let backend = MemoryBackend::new();
        let manager = ConnectionManager::new(Arc::new(backend.transport()), fast_config());
        let mut states = manager.watch_state();
        manager.connect().await.unwrap();

        backend.set_refuse_connections(true);
        backend.sever_connections();
        wait_for_state(&mut states, ConnectionState::Reconnecting).await;

        manager.disconnect().await.unwrap();
        backend.set_refuse_connections(false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(backend.session_count(), 0);
    }
}
