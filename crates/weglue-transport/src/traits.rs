//! Core transport trait definitions

use async_trait::async_trait;
use weglue_core::{ClientFrame, Result, ServerFrame};

/// One live bidirectional session with the messaging backend.
///
/// Sessions are produced by [`Transport::connect`] and owned by the
/// connection manager; nothing else holds one.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send an outbound frame. Fails if the session has been torn down.
    async fn send(&self, frame: ClientFrame) -> Result<()>;

    /// Receive the next inbound frame.
    ///
    /// Returns `Ok(None)` when the backend closed the session in an orderly
    /// fashion; transport faults surface as errors. Either outcome means the
    /// session is finished.
    async fn recv(&self) -> Result<Option<ServerFrame>>;

    /// Close the session. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Factory for transport sessions.
///
/// Implementations are cheap handles (an address, an in-process backend
/// reference); each `connect` call establishes a fresh session, which is how
/// the connection manager re-establishes after a drop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a new session with the backend.
    async fn connect(&self) -> Result<Box<dyn TransportSession>>;

    /// Transport type identifier, for logging.
    fn transport_type(&self) -> &'static str;
}
