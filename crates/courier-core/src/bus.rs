//! Typed publish/subscribe.
//!
//! [`EventBus`] delivers each event to synchronous [`Listener`]s in
//! subscription order and then to async consumers through a
//! `tokio::sync::broadcast` channel. A panicking listener is logged and
//! skipped; remaining listeners still receive the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the async broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A component that consumes events of type `E`.
///
/// Closures `Fn(&E)` implement this automatically; stores that need state
/// implement it on their own type and subscribe an `Arc` of themselves.
pub trait Listener<E>: Send + Sync {
    /// Handle one event. Called on the emitting task; must not block.
    fn on_event(&self, event: &E);
}

impl<E, F> Listener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event);
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listener registry plus broadcast fan-out for one event type.
pub struct EventBus<E> {
    listeners: RwLock<Vec<(SubscriptionId, Arc<dyn Listener<E>>)>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Create a bus with the default broadcast capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with a custom broadcast capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    /// Register a listener. Returns the id to pass to [`Self::unsubscribe`].
    pub fn subscribe(&self, listener: Arc<dyn Listener<E>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Register a closure listener.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Async receiver for events emitted after this call.
    pub fn receiver(&self) -> broadcast::Receiver<E> {
        self.channel.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Deliver `event` to every listener, then to broadcast receivers.
    ///
    /// Listeners are snapshotted first, so a listener may subscribe or
    /// unsubscribe while handling an event.
    pub fn emit(&self, event: E) {
        let snapshot: Vec<_> = self.listeners.read().clone();
        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if outcome.is_err() {
                warn!(subscription = id.0, "event listener panicked");
            }
        }
        // No receivers is fine.
        let _ = self.channel.send(event);
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
