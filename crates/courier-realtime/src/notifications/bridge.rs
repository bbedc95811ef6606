//! Routes notification-worthy socket frames into the arbiter.

use std::sync::Arc;

use courier_core::{Listener, NotificationEnvelope, SubscriptionId};
use tracing::trace;

use super::arbiter::NotificationArbiter;
use crate::connection::{ConnectionEvent, ConnectionManager};

struct WireNotifications {
    arbiter: NotificationArbiter,
}

impl Listener<ConnectionEvent> for WireNotifications {
    fn on_event(&self, event: &ConnectionEvent) {
        let ConnectionEvent::Message(frame) = event else {
            return;
        };
        if let Some(envelope) = NotificationEnvelope::from_wire(frame) {
            let decision = self.arbiter.handle_websocket_notification(envelope);
            trace!(frame = frame.event_type(), ?decision, "socket notification arbitrated");
        }
    }
}

/// Subscription linking a [`ConnectionManager`] to a [`NotificationArbiter`].
///
/// `message.new`, `game.start`, and `game.ended` frames become websocket
/// deliveries. Dropping the bridge leaves the subscription in place; call
/// [`Self::detach`] to remove it.
#[derive(Debug)]
pub struct NotificationBridge {
    manager: ConnectionManager,
    subscription: SubscriptionId,
}

impl NotificationBridge {
    /// Subscribe `arbiter` to frames from `manager`.
    pub fn attach(manager: &ConnectionManager, arbiter: NotificationArbiter) -> Self {
        let subscription = manager.subscribe(Arc::new(WireNotifications { arbiter }));
        Self {
            manager: manager.clone(),
            subscription,
        }
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn detach(self) -> bool {
        self.manager.unsubscribe(self.subscription)
    }
}
