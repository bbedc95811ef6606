//! # courier-realtime
//!
//! Realtime client runtime:
//!
//! - [`ConnectionManager`]: one self-healing WebSocket with heartbeats,
//!   jittered reconnect backoff, and an outbound queue
//! - [`NotificationArbiter`]: shows each notification once across socket,
//!   push, and local deliveries
//! - [`NotificationBridge`]: feeds decoded socket frames into the arbiter
//! - [`transport`]: the socket seam, with a tungstenite implementation and an
//!   in-memory double for tests

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod errors;
pub mod notifications;
pub mod transport;

pub use config::{ArbiterConfig, ConnectionConfig};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, DisconnectReason};
pub use errors::{ConnectionError, Result};
pub use notifications::{
    ArbiterEvent, ArbiterStats, Decision, DisplayedNotification, NotificationArbiter,
    NotificationBridge, PendingDisplay, SuppressReason,
};
pub use transport::{SocketPair, Transport, TungsteniteTransport};
