//! Connection error types.

use std::time::Duration;

use courier_core::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the connection manager and transports.
///
/// Cloneable so one failure can be delivered both to subscribers and to
/// every pending `connect()` caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport failed to open, read, or write.
    #[error("transport error: {0}")]
    Transport(String),
    /// The socket did not open within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// The peer closed the socket.
    #[error("connection closed: {0}")]
    Closed(String),
    /// No server traffic arrived within the heartbeat timeout.
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),
    /// An outbound value could not be serialized.
    #[error("failed to serialize outbound message: {0}")]
    Serialization(String),
    /// An inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The attempt was abandoned by `disconnect()` or a token update.
    #[error("connection attempt cancelled")]
    Cancelled,
    /// The configured socket URL is unusable.
    #[error("invalid socket URL: {0}")]
    InvalidUrl(String),
}

impl ConnectionError {
    /// Whether the reconnect policy should retry after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectTimeout(_) | Self::Closed(_) | Self::HeartbeatTimeout(_)
        )
    }
}

impl From<ProtocolError> for ConnectionError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ConnectionError::Closed("bye".into()).is_transient());
        assert!(ConnectionError::ConnectTimeout(Duration::from_secs(1)).is_transient());
        assert!(!ConnectionError::Cancelled.is_transient());
        assert!(!ConnectionError::Serialization("x".into()).is_transient());
    }

    #[test]
    fn protocol_error_converts() {
        let err: ConnectionError = ProtocolError::MissingType.into();
        assert_eq!(
            err,
            ConnectionError::Protocol("frame has no `type` discriminator".into())
        );
    }

    #[test]
    fn timeout_display() {
        let err = ConnectionError::HeartbeatTimeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "heartbeat timed out after 1.5s");
    }
}
