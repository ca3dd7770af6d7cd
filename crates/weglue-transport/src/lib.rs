//! Transport layer for the weglue messaging core
//!
//! Exactly one transport session to the messaging backend exists per
//! process, owned by the [`ConnectionManager`] for the lifetime of the
//! application. Screens never open connections; they observe the manager's
//! state and route sends through the dispatcher in `weglue-chat`.
//!
//! The wire is abstract: [`Transport`] produces a [`TransportSession`], and
//! two adapters are provided: a `tokio-tungstenite` WebSocket client for
//! real backends and an in-process [`MemoryBackend`] for tests and local
//! demos.

pub mod config;
pub mod manager;
pub mod memory;
pub mod traits;
pub mod websocket;

pub use config::ConnectionConfig;
pub use manager::{ConnectionManager, ConnectionState, ServerEventHandler};
pub use memory::{MemoryBackend, MemoryTransport};
pub use traits::{Transport, TransportSession};
pub use websocket::WebSocketTransport;
