//! Cross-channel notification arbitration.
//!
//! The same notification can arrive over the realtime socket, through a
//! platform push, or from a local trigger. The arbiter shows each id at most
//! once per dedup window:
//!
//! - Socket and local deliveries are shown immediately.
//! - Push deliveries are held for the priority delay so a socket delivery
//!   of the same id can win; the push is then dropped.
//! - Any delivery of an id that is displayed, pending, or was shown within
//!   the window is suppressed.
//!
//! Expiry is lazy: stale entries are purged whenever a delivery is looked
//! up. The window is measured from the first sighting of an id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{
    EventBus, Listener, NotificationEnvelope, NotificationId, NotificationSource, SubscriptionId,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ArbiterConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Why a delivery was not shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// The id is on screen.
    AlreadyDisplayed,
    /// A push for the id is waiting out its delay.
    PendingPush,
    /// The id was shown within the window and has since been hidden.
    RecentlyShown,
}

/// Outcome of one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Shown immediately.
    Shown(NotificationId),
    /// Held; shown after `delay` unless a faster channel wins.
    Deferred {
        /// Dedup identity.
        id: NotificationId,
        /// Remaining hold-back.
        delay: Duration,
    },
    /// Shown immediately, cancelling a pending push for the same id.
    Preempted(NotificationId),
    /// Dropped as a duplicate.
    Suppressed {
        /// Dedup identity.
        id: NotificationId,
        /// Cause.
        reason: SuppressReason,
    },
}

impl Decision {
    /// Whether the delivery reached the screen now.
    pub fn is_shown(&self) -> bool {
        matches!(self, Self::Shown(_) | Self::Preempted(_))
    }
}

/// A notification on screen.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayedNotification {
    /// Dedup identity (generated when the delivery had none).
    pub id: NotificationId,
    /// Delivered payload.
    pub envelope: NotificationEnvelope,
    /// Wall-clock display time.
    pub shown_at: DateTime<Utc>,
    /// Monotonic first sighting, used for expiry.
    pub first_seen: Instant,
}

/// A push waiting out the priority delay.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingDisplay {
    /// Dedup identity.
    pub id: NotificationId,
    /// Delivered payload.
    pub envelope: NotificationEnvelope,
    /// When the push arrived.
    pub scheduled_at: Instant,
    /// When it will be shown.
    pub fires_at: Instant,
}

/// Events published to presenters.
#[derive(Clone, Debug, PartialEq)]
pub enum ArbiterEvent {
    /// Show this notification.
    Displayed(DisplayedNotification),
    /// A delivery was dropped as a duplicate.
    Suppressed {
        /// Dedup identity.
        id: NotificationId,
        /// Channel of the dropped delivery.
        source: NotificationSource,
        /// Cause.
        reason: SuppressReason,
    },
    /// A notification was dismissed or a pending push was cancelled.
    Hidden {
        /// Dedup identity.
        id: NotificationId,
    },
}

/// Arbiter counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbiterStats {
    /// Notifications on screen.
    pub displayed: usize,
    /// Pushes waiting out the delay.
    pub pending: usize,
    /// Ids remembered for dedup.
    pub history: usize,
    /// Configured dedup window.
    pub dedup_window_ms: u64,
    /// Configured push hold-back.
    pub priority_delay_ms: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SeenRecord {
    first_seen: Instant,
    shown: bool,
}

struct PendingEntry {
    display: PendingDisplay,
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    displayed: HashMap<NotificationId, DisplayedNotification>,
    pending: HashMap<NotificationId, PendingEntry>,
    history: HashMap<NotificationId, SeenRecord>,
    next_generation: u64,
}

impl State {
    /// Drop displayed and history entries older than `window`. Pending
    /// pushes are left alone; each is bounded by its own timer.
    fn purge_expired(&mut self, now: Instant, window: Duration) {
        let live = |first_seen: Instant| now.saturating_duration_since(first_seen) < window;
        self.displayed.retain(|_, shown| live(shown.first_seen));
        self.history.retain(|_, record| live(record.first_seen));
    }

    fn remember(&mut self, id: &NotificationId, now: Instant, shown: bool, max_history: usize) {
        let _ = self
            .history
            .entry(id.clone())
            .and_modify(|record| record.shown |= shown)
            .or_insert(SeenRecord {
                first_seen: now,
                shown,
            });
        while self.history.len() > max_history {
            let oldest = self
                .history
                .iter()
                .min_by_key(|(_, record)| record.first_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(oldest) => {
                    let _ = self.history.remove(&oldest);
                }
                None => break,
            }
        }
    }

    fn show(
        &mut self,
        id: NotificationId,
        envelope: NotificationEnvelope,
        first_seen: Instant,
    ) -> DisplayedNotification {
        let displayed = DisplayedNotification {
            id: id.clone(),
            envelope,
            shown_at: Utc::now(),
            first_seen,
        };
        let _ = self.displayed.insert(id, displayed.clone());
        displayed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arbiter
// ─────────────────────────────────────────────────────────────────────────────

struct Inner {
    config: ArbiterConfig,
    state: Mutex<State>,
    events: EventBus<ArbiterEvent>,
}

/// Decides which deliveries reach the screen. Cheap to clone.
#[derive(Clone)]
pub struct NotificationArbiter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for NotificationArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationArbiter")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for NotificationArbiter {
    fn default() -> Self {
        Self::new(ArbiterConfig::default())
    }
}

impl NotificationArbiter {
    /// Create an arbiter.
    pub fn new(config: ArbiterConfig) -> Self {
        if config.priority_delay >= config.dedup_window {
            warn!(
                priority_delay_ms = millis(config.priority_delay),
                dedup_window_ms = millis(config.dedup_window),
                "priority delay reaches the dedup window, held pushes may show twice"
            );
        }
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                events: EventBus::new(),
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ArbiterConfig {
        &self.inner.config
    }

    /// Handle a delivery from the realtime socket.
    pub fn handle_websocket_notification(&self, envelope: NotificationEnvelope) -> Decision {
        self.ingest(envelope, NotificationSource::Websocket)
    }

    /// Handle a platform push delivery. Must run inside a Tokio runtime;
    /// the hold-back timer is a spawned task.
    pub fn handle_push_notification(&self, envelope: NotificationEnvelope) -> Decision {
        self.ingest(envelope, NotificationSource::Push)
    }

    /// Handle a locally generated notification.
    pub fn handle_local_notification(&self, envelope: NotificationEnvelope) -> Decision {
        self.ingest(envelope, NotificationSource::Local)
    }

    /// Handle a delivery whose channel is named on the envelope.
    pub fn handle(&self, envelope: NotificationEnvelope) -> Decision {
        let source = envelope.source;
        self.ingest(envelope, source)
    }

    /// Dismiss a displayed notification or cancel a pending push.
    ///
    /// Returns `false` when the id is unknown. The id stays in history, so
    /// a late duplicate within the window is still suppressed.
    pub fn hide_notification(&self, id: &str) -> bool {
        let id = NotificationId::from(id);
        let removed = {
            let mut state = self.inner.state.lock();
            let was_displayed = state.displayed.remove(&id).is_some();
            let was_pending = match state.pending.remove(&id) {
                Some(entry) => {
                    entry.cancel.cancel();
                    true
                }
                None => false,
            };
            was_displayed || was_pending
        };
        if removed {
            debug!(id = %id, "notification hidden");
            self.inner.events.emit(ArbiterEvent::Hidden { id });
        }
        removed
    }

    /// Notifications on screen, oldest first.
    pub fn displayed_notifications(&self) -> Vec<DisplayedNotification> {
        let mut displayed: Vec<_> = self.inner.state.lock().displayed.values().cloned().collect();
        displayed.sort_by_key(|shown| shown.first_seen);
        displayed
    }

    /// Pushes waiting out the delay, soonest first.
    pub fn pending_notifications(&self) -> Vec<PendingDisplay> {
        let mut pending: Vec<_> = self
            .inner
            .state
            .lock()
            .pending
            .values()
            .map(|entry| entry.display.clone())
            .collect();
        pending.sort_by_key(|display| display.fires_at);
        pending
    }

    /// Whether `id` is on screen.
    pub fn is_displayed(&self, id: &str) -> bool {
        self.inner
            .state
            .lock()
            .displayed
            .contains_key(&NotificationId::from(id))
    }

    /// Counters. Does not purge expired entries.
    pub fn stats(&self) -> ArbiterStats {
        let state = self.inner.state.lock();
        ArbiterStats {
            displayed: state.displayed.len(),
            pending: state.pending.len(),
            history: state.history.len(),
            dedup_window_ms: millis(self.inner.config.dedup_window),
            priority_delay_ms: millis(self.inner.config.priority_delay),
        }
    }

    /// Forget everything and cancel every pending push.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        for entry in state.pending.values() {
            entry.cancel.cancel();
        }
        let cleared = state.displayed.len() + state.pending.len();
        state.displayed.clear();
        state.pending.clear();
        state.history.clear();
        drop(state);
        info!(cleared, "notification arbiter reset");
    }

    /// Register a presenter.
    pub fn subscribe(&self, listener: Arc<dyn Listener<ArbiterEvent>>) -> SubscriptionId {
        self.inner.events.subscribe(listener)
    }

    /// Register a closure presenter.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&ArbiterEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_fn(f)
    }

    /// Remove a presenter.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// Async receiver for events emitted after this call.
    pub fn events(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.inner.events.receiver()
    }

    fn ingest(&self, mut envelope: NotificationEnvelope, source: NotificationSource) -> Decision {
        envelope.source = source;
        if envelope.priority.is_none() {
            envelope.priority = Some(source.default_priority());
        }

        let Some(id) = envelope.identity() else {
            return self.show_unidentified(envelope);
        };

        let now = Instant::now();
        let config = &self.inner.config;
        let mut events = Vec::new();
        let mut schedule = None;

        let decision = {
            let mut state = self.inner.state.lock();
            state.purge_expired(now, config.dedup_window);

            if state.displayed.contains_key(&id) {
                Decision::Suppressed {
                    id: id.clone(),
                    reason: SuppressReason::AlreadyDisplayed,
                }
            } else if state.pending.contains_key(&id) {
                if source.is_immediate() {
                    let first_seen = match state.pending.remove(&id) {
                        Some(entry) => {
                            entry.cancel.cancel();
                            entry.display.scheduled_at
                        }
                        None => now,
                    };
                    state.remember(&id, now, true, config.max_history);
                    events.push(ArbiterEvent::Displayed(state.show(id.clone(), envelope, first_seen)));
                    Decision::Preempted(id.clone())
                } else {
                    Decision::Suppressed {
                        id: id.clone(),
                        reason: SuppressReason::PendingPush,
                    }
                }
            } else if state.history.get(&id).is_some_and(|record| record.shown) {
                Decision::Suppressed {
                    id: id.clone(),
                    reason: SuppressReason::RecentlyShown,
                }
            } else if source.is_immediate() {
                let first_seen = state.history.get(&id).map_or(now, |record| record.first_seen);
                state.remember(&id, now, true, config.max_history);
                events.push(ArbiterEvent::Displayed(state.show(id.clone(), envelope, first_seen)));
                Decision::Shown(id.clone())
            } else {
                state.next_generation += 1;
                let generation = state.next_generation;
                let cancel = CancellationToken::new();
                let display = PendingDisplay {
                    id: id.clone(),
                    envelope,
                    scheduled_at: now,
                    fires_at: now + config.priority_delay,
                };
                let _ = state.pending.insert(
                    id.clone(),
                    PendingEntry {
                        display,
                        generation,
                        cancel: cancel.clone(),
                    },
                );
                state.remember(&id, now, false, config.max_history);
                schedule = Some((generation, cancel));
                Decision::Deferred {
                    id: id.clone(),
                    delay: config.priority_delay,
                }
            }
        };

        if let Decision::Suppressed { id, reason } = &decision {
            debug!(id = %id, ?source, ?reason, "duplicate notification suppressed");
            events.push(ArbiterEvent::Suppressed {
                id: id.clone(),
                source,
                reason: *reason,
            });
        }
        if let Some((generation, cancel)) = schedule {
            self.schedule_pending(id, generation, cancel);
        }
        for event in events {
            self.inner.events.emit(event);
        }
        decision
    }

    fn show_unidentified(&self, envelope: NotificationEnvelope) -> Decision {
        let id = NotificationId::new();
        warn!(
            generated_id = %id,
            source = ?envelope.source,
            kind = %envelope.kind,
            "notification without id, showing without dedup"
        );
        let now = Instant::now();
        let displayed = {
            let mut state = self.inner.state.lock();
            state.purge_expired(now, self.inner.config.dedup_window);
            state.show(id.clone(), envelope, now)
        };
        self.inner.events.emit(ArbiterEvent::Displayed(displayed));
        Decision::Shown(id)
    }

    fn schedule_pending(&self, id: NotificationId, generation: u64, cancel: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let delay = inner.config.priority_delay;
        debug!(id = %id, delay_ms = millis(delay), "push held for socket delivery");
        let _handle = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = time::sleep(delay) => inner.fire_pending(&id, generation),
            }
        });
    }
}

impl Inner {
    fn fire_pending(&self, id: &NotificationId, generation: u64) {
        let displayed = {
            let mut state = self.state.lock();
            let current = state
                .pending
                .get(id)
                .is_some_and(|entry| entry.generation == generation);
            if !current {
                return;
            }
            let Some(entry) = state.pending.remove(id) else {
                return;
            };
            state.remember(id, Instant::now(), true, self.config.max_history);
            let PendingDisplay {
                envelope,
                scheduled_at,
                ..
            } = entry.display;
            state.show(id.clone(), envelope, scheduled_at)
        };
        debug!(id = %id, "held push displayed");
        self.events.emit(ArbiterEvent::Displayed(displayed));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
