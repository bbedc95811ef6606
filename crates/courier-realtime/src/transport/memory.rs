//! In-process transport for tests.
//!
//! Each `open` consumes the next scripted [`OpenOutcome`] (accepting when
//! the script is empty). Accepted sockets surface on the paired
//! [`MemoryServer`] as a [`MemoryPeer`] that plays the server side.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use super::{SocketPair, Transport};
use crate::errors::{ConnectionError, Result};

/// What the next `open` call does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Complete the handshake and hand a peer to the server.
    Accept,
    /// Fail with a transport error carrying this reason.
    Refuse(String),
    /// Never complete.
    Hang,
}

struct Shared {
    script: Mutex<VecDeque<OpenOutcome>>,
    opened: Mutex<Vec<Url>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Scripted in-memory [`Transport`].
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("opened", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Create a transport and the server end that receives its peers.
    pub fn new() -> (Self, MemoryServer) {
        let (peers, accepted) = mpsc::unbounded();
        let transport = Self {
            shared: Arc::new(Shared {
                script: Mutex::new(VecDeque::new()),
                opened: Mutex::new(Vec::new()),
                peers,
            }),
        };
        (transport, MemoryServer { accepted })
    }

    /// Queue the outcome of a future `open` call.
    pub fn push_outcome(&self, outcome: OpenOutcome) {
        self.shared.script.lock().push_back(outcome);
    }

    /// Queue several outcomes in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        self.shared.script.lock().extend(outcomes);
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.shared.opened.lock().len()
    }

    /// URLs passed to `open`, oldest first.
    pub fn opened_urls(&self) -> Vec<Url> {
        self.shared.opened.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, url: &Url) -> Result<SocketPair> {
        self.shared.opened.lock().push(url.clone());
        let outcome = self
            .shared
            .script
            .lock()
            .pop_front()
            .unwrap_or(OpenOutcome::Accept);

        match outcome {
            OpenOutcome::Accept => {
                let (to_client, client_inbox) = mpsc::unbounded();
                let (client_outbox, from_client) = mpsc::unbounded();
                let peer = MemoryPeer {
                    url: url.clone(),
                    to_client: Some(to_client),
                    from_client,
                };
                // A dropped server closes the peer, which the client sees as EOF.
                let _ = self.shared.peers.unbounded_send(peer);
                Ok(SocketPair {
                    sink: Box::pin(
                        client_outbox.sink_map_err(|e| ConnectionError::Closed(e.to_string())),
                    ),
                    stream: client_inbox.boxed(),
                })
            }
            OpenOutcome::Refuse(reason) => Err(ConnectionError::Transport(reason)),
            OpenOutcome::Hang => futures::future::pending().await,
        }
    }
}

/// Server end of a [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next accepted socket.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.next().await
    }

    /// Next accepted socket if one is already waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.next().now_or_never().flatten()
    }
}

/// Server side of one accepted in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    to_client: Option<mpsc::UnboundedSender<Result<String>>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client opened.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver a text frame to the client. `false` once closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(Ok(text.into())).is_ok())
    }

    /// Deliver a JSON frame to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Fail the client's read side with a transport error.
    pub fn send_error(&self, reason: impl Into<String>) -> bool {
        self.to_client.as_ref().is_some_and(|tx| {
            tx.unbounded_send(Err(ConnectionError::Transport(reason.into())))
                .is_ok()
        })
    }

    /// Close the server side; the client observes end of stream.
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next frame written by the client, `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Next client frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next client frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.next().now_or_never().flatten()
    }
}
