//! Shared vocabulary for the weglue messaging core
//!
//! This crate defines the types every other layer speaks: identifiers,
//! timestamps, the message and conversation model, the wire protocol frames
//! exchanged with the messaging backend, and the unified error type.
//!
//! Nothing here performs I/O. The transport layer lives in
//! `weglue-transport`, the conversation store and dispatcher in
//! `weglue-chat`.

pub mod errors;
pub mod identifiers;
pub mod message;
pub mod protocol;
pub mod time;

pub use errors::{Result, WeglueError};
pub use identifiers::{ConversationId, MessageId, UserId};
pub use message::{ConversationKind, ConversationSummary, DeliveryState, Message};
pub use protocol::{ClientFrame, ServerEventKind, ServerFrame, WireMessage};
pub use time::Timestamp;
