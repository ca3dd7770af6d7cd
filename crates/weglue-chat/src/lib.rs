//! Conversation store and message dispatcher
//!
//! The client-side messaging state machine. [`ConversationStore`] holds the
//! process-wide, in-memory history keyed by conversation; the
//! [`MessageDispatcher`] feeds inbound transport events into it and carries
//! outbound user intents to the connection manager, reconciling optimistic
//! sends with server-confirmed events.
//!
//! All mutation of conversation history flows through these two types.
//! Presentation code reads via [`ConversationStore::messages`] and
//! [`ConversationStore::subscribe`] and sends via
//! [`MessageDispatcher::send_message`]; it never touches the message
//! sequence directly, so optimistic and authoritative state cannot diverge.

pub mod dispatcher;
pub mod history;
pub mod session;
pub mod store;

pub use dispatcher::{DispatcherConfig, MessageDispatcher};
pub use history::{HistoryBackend, InMemoryHistoryBackend};
pub use session::{UserProfile, UserRole, UserSession};
pub use store::{ConversationStore, Reconciliation, StoreEvent, SubscriptionId, SubscriptionScope};
