//! Socket transports.
//!
//! The connection manager talks to the network only through [`Transport`],
//! which opens a socket and hands back a text-frame sink and stream.
//! [`TungsteniteTransport`] is the production implementation;
//! [`memory::MemoryTransport`] is an in-process double for tests.

pub mod memory;
pub mod tungstenite;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Sink;
use futures::stream::BoxStream;
use url::Url;

use crate::errors::{ConnectionError, Result};

pub use self::tungstenite::TungsteniteTransport;

/// Outbound half of an open socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ConnectionError> + Send>>;

/// Inbound half of an open socket. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// An open socket split into its two halves.
pub struct SocketPair {
    /// Text frames to the server.
    pub sink: FrameSink,
    /// Text frames from the server.
    pub stream: FrameStream,
}

impl std::fmt::Debug for SocketPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketPair").finish_non_exhaustive()
    }
}

/// Opens sockets for the connection manager.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a socket to `url`. Resolves once the handshake completes.
    async fn open(&self, url: &Url) -> Result<SocketPair>;
}
