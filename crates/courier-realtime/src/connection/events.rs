//! Events published by the connection manager.

use std::time::Duration;

use courier_core::{ConnectionState, WireEvent};

use crate::errors::ConnectionError;

/// Why an established connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Manual,
    /// The auth token changed and the socket is being reopened.
    TokenRefresh,
    /// The manager was disposed.
    Disposed,
    /// The socket failed or the peer closed it.
    Lost(ConnectionError),
}

impl DisconnectReason {
    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TokenRefresh => "token_refresh",
            Self::Disposed => "disposed",
            Self::Lost(_) => "lost",
        }
    }
}

/// Everything subscribers can observe about a connection.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// The socket opened and the outbound queue was flushed.
    Connected,
    /// An established or in-progress connection ended.
    Disconnected {
        /// Cause.
        reason: DisconnectReason,
    },
    /// A retry was scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff before the attempt starts.
        delay: Duration,
    },
    /// A scheduled retry started opening a socket.
    ReconnectionAttempt {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// The retry budget ran out.
    ReconnectionFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// No server traffic arrived within the heartbeat timeout.
    ConnectionTimeout,
    /// The state machine moved.
    StateChanged {
        /// New state.
        new: ConnectionState,
        /// Previous state.
        old: ConnectionState,
    },
    /// A decoded server frame.
    Message(WireEvent),
    /// A transport or protocol failure.
    Error(ConnectionError),
}

impl ConnectionEvent {
    /// Event name as used in logs and CLI output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::ReconnectionAttempt { .. } => "reconnection_attempt",
            Self::ReconnectionFailed { .. } => "reconnection_failed",
            Self::ConnectionTimeout => "connection_timeout",
            Self::StateChanged { .. } => "connection_state_changed",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
        }
    }
}
