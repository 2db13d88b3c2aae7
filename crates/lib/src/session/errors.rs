//! Error types for client sessions.
//!
//! Network failures are reported here so the connection loop can classify
//! them, but they never reach API callers: the session retries with backoff
//! and exposes the outage through its connection state.

use thiserror::Error;

/// Errors that can occur in a client session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// A storage mutation was requested before the initial storage arrived.
    #[error("Storage of room {room_id} is not loaded yet")]
    StorageNotLoaded { room_id: String },

    /// The server rejected the credentials or the authentication endpoint failed.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Opening the socket failed.
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The socket was closed by the peer.
    #[error("Connection closed with code {code}")]
    ConnectionClosed { code: u16 },

    /// No pong arrived within the heartbeat deadline.
    #[error("No pong received within {timeout_ms}ms")]
    PongTimeout { timeout_ms: u64 },

    /// A frame from the server could not be decoded.
    #[error("Invalid server message: {reason}")]
    InvalidMessage { reason: String },

    /// The room is not entered in this client.
    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    /// The room task has stopped and no longer accepts commands.
    #[error("Room {room_id} is closed")]
    RoomClosed { room_id: String },
}

impl SessionError {
    /// Check if this error is a transient network failure, retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::AuthenticationFailed { .. }
                | SessionError::ConnectionFailed { .. }
                | SessionError::ConnectionClosed { .. }
                | SessionError::PongTimeout { .. }
        )
    }

    /// Check if reconnecting should use the slow backoff table.
    ///
    /// Authentication failures and application close codes (4000-4999) are
    /// unlikely to resolve quickly.
    pub fn needs_slow_backoff(&self) -> bool {
        match self {
            SessionError::AuthenticationFailed { .. } => true,
            SessionError::ConnectionClosed { code } => (4000..5000).contains(code),
            _ => false,
        }
    }

    /// Check if this error is a usage error (invalid API call by the caller).
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            SessionError::StorageNotLoaded { .. }
                | SessionError::RoomNotFound { .. }
                | SessionError::RoomClosed { .. }
        )
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::RoomNotFound { .. })
    }
}

// Conversion from SessionError to the main Error type
impl From<SessionError> for crate::Error {
    fn from(err: SessionError) -> Self {
        crate::Error::Session(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let auth = SessionError::AuthenticationFailed {
            reason: "403".to_string(),
        };
        assert!(auth.is_transient());
        assert!(auth.needs_slow_backoff());

        let normal_close = SessionError::ConnectionClosed { code: 1006 };
        assert!(normal_close.is_transient());
        assert!(!normal_close.needs_slow_backoff());
        assert!(SessionError::ConnectionClosed { code: 4001 }.needs_slow_backoff());

        let not_loaded = SessionError::StorageNotLoaded {
            room_id: "r".to_string(),
        };
        assert!(not_loaded.is_usage_error());
        assert!(!not_loaded.is_transient());
    }

    #[test]
    fn test_converts_to_crate_error() {
        let err: crate::Error = SessionError::RoomNotFound {
            room_id: "r".to_string(),
        }
        .into();
        assert_eq!(err.module(), "session");
        assert!(err.is_not_found());
    }
}
