//! Unified error type
//!
//! One enum covers every failure the core can produce. The dispatcher
//! resolves send failures into a message's `DeliveryState` instead of
//! letting them escape to the presentation layer; connection-level failures
//! are recovered by the connection manager and surfaced only as advisory
//! state changes.

use serde::{Deserialize, Serialize};

/// Unified error type for all weglue operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WeglueError {
    /// Send rejected at the boundary: body empty after trimming.
    #[error("message body is empty after trimming")]
    EmptyMessage,

    /// Emit attempted while no transport session is live.
    #[error("not connected to the messaging backend")]
    NotConnected,

    /// Transport-level fault (socket error, handshake failure, mid-send drop).
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport fault.
        message: String,
    },

    /// Backend explicitly rejected a send.
    #[error("rejected by backend: {message}")]
    Rejected {
        /// Rejection reason reported by the backend.
        message: String,
    },

    /// Wire frame could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Resource not found.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// Invalid input, state, or configuration.
    #[error("invalid: {message}")]
    Invalid {
        /// Description of the invalid input.
        message: String,
    },

    /// Operation not permitted for the current user's role.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the permission issue.
        message: String,
    },

    /// Internal invariant violation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl WeglueError {
    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a backend-rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a permission-denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for WeglueError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, WeglueError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_display_messages() {
        let err = WeglueError::transport("socket reset");
        assert_eq!(err.to_string(), "transport error: socket reset");
        assert_eq!(
            WeglueError::NotConnected.to_string(),
            "not connected to the messaging backend"
        );
    }

    #[test]
    fn test_serde_json_conversion() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope");
        let err: WeglueError = bad.unwrap_err().into();
        assert_matches!(err, WeglueError::Serialization { .. });
    }
}
