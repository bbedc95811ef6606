//! Self-healing realtime connection.
//!
//! [`ConnectionManager`] owns one logical connection to the realtime
//! server. It opens sockets through a [`Transport`], keeps them alive with
//! heartbeats, reconnects with jittered exponential backoff, and buffers
//! outbound frames while the socket is down.
//!
//! All mutable state lives in one mutex-guarded `Core`. Each connection
//! cycle runs on its own driver task tagged with a generation number; a
//! driver whose generation is stale stops touching shared state. Events are
//! always emitted after the lock is released, so listeners may call back
//! into the manager.

mod driver;
pub mod events;
pub mod heartbeat;
pub mod queue;
pub mod url;

use std::sync::Arc;

use courier_core::{ConnectionState, EventBus, Listener, SubscriptionId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::errors::{ConnectionError, Result};
use crate::transport::{Transport, TungsteniteTransport};

use self::driver::Driver;
pub use self::events::{ConnectionEvent, DisconnectReason};
use self::queue::{OutboundQueue, QueuedMessage};
use self::url::build_socket_url;

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Inner {
    pub(crate) config: ConnectionConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) core: Mutex<Core>,
    pub(crate) events: EventBus<ConnectionEvent>,
}

pub(crate) struct Core {
    pub(crate) state: ConnectionState,
    pub(crate) token: String,
    pub(crate) queue: OutboundQueue,
    /// Present only while connected; feeds the driver's socket writer.
    pub(crate) writer: Option<mpsc::UnboundedSender<QueuedMessage>>,
    pub(crate) reconnect_attempts: u32,
    pub(crate) generation: u64,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) waiters: Vec<oneshot::Sender<Result<()>>>,
    pub(crate) connected_since: Option<Instant>,
    pub(crate) sockets_opened: u64,
    pub(crate) disposed: bool,
}

impl Core {
    /// Move to `new`, recording a change event when the state differs.
    pub(crate) fn transition(&mut self, new: ConnectionState, events: &mut Vec<ConnectionEvent>) {
        let old = std::mem::replace(&mut self.state, new);
        if old != new {
            events.push(ConnectionEvent::StateChanged { new, old });
        }
    }

    /// Settle every pending `connect()` with `outcome`.
    pub(crate) fn resolve_waiters(&mut self, outcome: &Result<()>) {
        for waiter in self.waiters.drain(..) {
            // The caller may have stopped waiting.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Inner {
    pub(crate) fn emit_all(&self, events: Vec<ConnectionEvent>) {
        for event in events {
            debug!(event = event.name(), "connection event");
            self.events.emit(event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time view of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Outbound frames waiting for a connection.
    pub queued_messages: usize,
    /// Time since the socket opened, when connected.
    pub connected_for_ms: Option<u64>,
    /// Sockets opened over the manager's lifetime.
    pub sockets_opened: u64,
}

/// Handle to a managed realtime connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager that opens sockets through `transport`.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let queue = OutboundQueue::new(config.max_queue_size);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    token: String::new(),
                    queue,
                    writer: None,
                    reconnect_attempts: 0,
                    generation: 0,
                    cancel: None,
                    waiters: Vec::new(),
                    connected_since: None,
                    sockets_opened: 0,
                    disposed: false,
                }),
                events: EventBus::new(),
            }),
        }
    }

    /// Create a manager backed by real WebSockets.
    pub fn with_tungstenite(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(TungsteniteTransport::new()))
    }

    /// Configuration in use.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Set the auth token used by the next socket open without touching
    /// the current connection.
    pub fn set_token(&self, token: impl Into<String>) {
        self.inner.core.lock().token = token.into();
    }

    /// Connect, or join the attempt already in progress.
    ///
    /// Resolves `Ok` once a socket is open. Resolves with the error of the
    /// first failed attempt; retries continue in the background when
    /// auto-reconnect is enabled. Calling while connected returns `Ok`
    /// without opening another socket.
    pub async fn connect(&self) -> Result<()> {
        let (outcome, started) = {
            let mut core = self.inner.core.lock();
            match core.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting => {
                    let (tx, rx) = oneshot::channel();
                    core.waiters.push(tx);
                    (rx, None)
                }
                ConnectionState::Disconnected | ConnectionState::Error => {
                    let _ = build_socket_url(&self.inner.config.url, &core.token)?;
                    core.disposed = false;
                    let (tx, rx) = oneshot::channel();
                    core.waiters.push(tx);
                    let mut events = Vec::new();
                    let driver = Driver::start(&self.inner, &mut core, &mut events);
                    (rx, Some((driver, events)))
                }
            }
        };

        if let Some((driver, events)) = started {
            info!(url = %self.inner.config.url, "connecting");
            self.inner.emit_all(events);
            driver.spawn();
        }
        outcome.await.unwrap_or(Err(ConnectionError::Cancelled))
    }

    /// Close the connection and stop reconnecting. Idempotent.
    ///
    /// Pending `connect()` calls resolve with [`ConnectionError::Cancelled`].
    /// Queued outbound frames are kept for the next connection.
    pub fn disconnect(&self) {
        self.shutdown(DisconnectReason::Manual);
    }

    /// Replace the auth token. An active connection is torn down and
    /// reopened with the new token; an idle one is left idle.
    pub async fn update_token(&self, token: impl Into<String>) -> Result<()> {
        let active = {
            let mut core = self.inner.core.lock();
            core.token = token.into();
            core.state.is_active()
        };
        if !active {
            debug!("auth token updated while idle");
            return Ok(());
        }
        info!("auth token changed, reopening connection");
        self.shutdown(DisconnectReason::TokenRefresh);
        self.connect().await
    }

    /// Serialize `message` and send it, or queue it until connected.
    ///
    /// Returns `Ok(true)` when handed to the open socket and `Ok(false)`
    /// when queued. A full queue drops its oldest entry.
    pub fn send_message<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool> {
        let payload = serde_json::to_string(message)?;
        Ok(self.send_payload(payload))
    }

    fn send_payload(&self, payload: String) -> bool {
        let mut message = QueuedMessage::new(payload);
        let mut core = self.inner.core.lock();
        if core.state == ConnectionState::Connected {
            if let Some(writer) = &core.writer {
                match writer.send(message) {
                    Ok(()) => return true,
                    Err(mpsc::error::SendError(returned)) => message = returned,
                }
            }
        }
        let evicted = core.queue.push(message);
        let queued = core.queue.len();
        drop(core);

        match evicted {
            Some(evicted) => warn!(
                queued,
                dropped_bytes = evicted.payload.len(),
                "outbound queue full, dropped oldest message"
            ),
            None => debug!(queued, "message queued until connected"),
        }
        false
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Whether a socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Outbound frames waiting for a connection.
    pub fn queue_len(&self) -> usize {
        self.inner.core.lock().queue.len()
    }

    /// Drop every queued outbound frame, returning how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let dropped = self.inner.core.lock().queue.clear();
        if dropped > 0 {
            info!(dropped, "outbound queue cleared");
        }
        dropped
    }

    /// Failed attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().reconnect_attempts
    }

    /// Snapshot of state, attempts, and queue depth.
    pub fn status(&self) -> ConnectionStatus {
        let core = self.inner.core.lock();
        ConnectionStatus {
            state: core.state,
            reconnect_attempts: core.reconnect_attempts,
            queued_messages: core.queue.len(),
            connected_for_ms: core.connected_since.map(|since| {
                u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
            }),
            sockets_opened: core.sockets_opened,
        }
    }

    /// Register a listener for connection events.
    pub fn subscribe(&self, listener: Arc<dyn Listener<ConnectionEvent>>) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Register a closure listener for connection events.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_fn(f)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Async receiver for events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.receiver()
    }

    /// Disconnect, drop queued frames, and remove every listener.
    pub fn dispose(&self) {
        self.shutdown(DisconnectReason::Disposed);
        {
            let mut core = self.inner.core.lock();
            core.disposed = true;
            let _ = core.queue.clear();
        }
        self.inner.events.clear();
        debug!("connection manager disposed");
    }

    fn shutdown(&self, reason: DisconnectReason) {
        let events = {
            let mut core = self.inner.core.lock();
            core.generation += 1;
            if let Some(cancel) = core.cancel.take() {
                cancel.cancel();
            }
            core.writer = None;
            core.connected_since = None;
            core.resolve_waiters(&Err(ConnectionError::Cancelled));

            let mut events = Vec::new();
            if core.state != ConnectionState::Disconnected {
                core.transition(ConnectionState::Disconnected, &mut events);
                events.push(ConnectionEvent::Disconnected {
                    reason: reason.clone(),
                });
            }
            events
        };
        if !events.is_empty() {
            info!(reason = reason.as_str(), "disconnected");
        }
        self.inner.emit_all(events);
    }
}
