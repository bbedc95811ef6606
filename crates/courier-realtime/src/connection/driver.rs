//! Per-cycle connection task.
//!
//! A driver opens a socket, pumps frames until the socket fails, then asks
//! the reconnect policy whether to wait and try again. It holds the
//! generation it was started with; once `Core::generation` moves on, every
//! state update from this driver is discarded and the task winds down.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_core::wire::decode_frame;
use courier_core::{ConnectionState, WireEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::events::{ConnectionEvent, DisconnectReason};
use super::heartbeat::{HeartbeatMonitor, sleep_until_deadline};
use super::queue::QueuedMessage;
use super::url::build_socket_url;
use super::{Core, Inner};
use crate::errors::{ConnectionError, Result};
use crate::transport::{FrameSink, SocketPair};

/// Time allowed for a graceful close handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Sockets a frame may be handed to before it is dropped.
const MAX_SEND_ATTEMPTS: u32 = 3;

enum Exit {
    Cancelled,
    Failed(ConnectionError),
}

enum Next {
    Retry(Duration),
    Stop,
}

pub(super) struct Driver {
    inner: Arc<Inner>,
    generation: u64,
    cancel: CancellationToken,
}

impl Driver {
    /// Begin a new connection cycle: bump the generation, cancel any
    /// previous driver, reset the attempt counter, and move to `Connecting`.
    pub(super) fn start(
        inner: &Arc<Inner>,
        core: &mut Core,
        events: &mut Vec<ConnectionEvent>,
    ) -> Self {
        core.generation += 1;
        if let Some(previous) = core.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        core.cancel = Some(cancel.clone());
        core.reconnect_attempts = 0;
        core.transition(ConnectionState::Connecting, events);
        Self {
            inner: Arc::clone(inner),
            generation: core.generation,
            cancel,
        }
    }

    pub(super) fn spawn(self) {
        let _handle = tokio::spawn(self.run());
    }

    async fn run(self) {
        loop {
            let failure = match self.attempt().await {
                Exit::Cancelled => return,
                Exit::Failed(err) => err,
            };
            match self.on_failure(failure) {
                Next::Stop => return,
                Next::Retry(delay) => {
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = time::sleep(delay) => {}
                    }
                    if !self.begin_attempt() {
                        return;
                    }
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // One socket
    // ─────────────────────────────────────────────────────────────────────

    async fn attempt(&self) -> Exit {
        let url = match self.current_url() {
            None => return Exit::Cancelled,
            Some(Err(err)) => return Exit::Failed(err),
            Some(Ok(url)) => url,
        };
        let timeout = self.inner.config.connect_timeout;
        debug!(host = url.host_str().unwrap_or(""), generation = self.generation, "opening socket");

        let opened = tokio::select! {
            () = self.cancel.cancelled() => return Exit::Cancelled,
            opened = time::timeout(timeout, self.inner.transport.open(&url)) => opened,
        };
        let socket = match opened {
            Ok(Ok(socket)) => socket,
            Ok(Err(err)) => return Exit::Failed(err),
            Err(_) => return Exit::Failed(ConnectionError::ConnectTimeout(timeout)),
        };

        match self.on_open() {
            Some(outbound) => self.pump(socket, outbound).await,
            // Superseded while the handshake was in flight.
            None => Exit::Cancelled,
        }
    }

    async fn pump(
        &self,
        socket: SocketPair,
        mut outbound: mpsc::UnboundedReceiver<QueuedMessage>,
    ) -> Exit {
        let SocketPair {
            mut sink,
            mut stream,
        } = socket;
        let interval = self.inner.config.heartbeat_interval;
        let mut heartbeat = HeartbeatMonitor::new(self.inner.config.heartbeat_timeout, Instant::now());
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut unsent = Vec::new();

        let exit = loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break Exit::Cancelled,

                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        if self.handle_frame(&text) {
                            heartbeat.ack_received(Instant::now());
                        } else {
                            heartbeat.mark_alive(Instant::now());
                        }
                    }
                    Some(Err(err)) => break Exit::Failed(err),
                    None => break Exit::Failed(ConnectionError::Closed("closed by server".into())),
                },

                () = sleep_until_deadline(heartbeat.deadline()) => {
                    warn!(
                        timeout_ms = u64::try_from(heartbeat.timeout().as_millis()).unwrap_or(u64::MAX),
                        probes = heartbeat.probes_sent(),
                        "heartbeat timed out"
                    );
                    self.emit_if_current(vec![ConnectionEvent::ConnectionTimeout]);
                    break Exit::Failed(ConnectionError::HeartbeatTimeout(heartbeat.timeout()));
                }

                message = outbound.recv() => match message {
                    Some(mut message) => {
                        message.attempts += 1;
                        if let Some(exit) = self.write(&mut sink, message.payload.clone()).await {
                            unsent.push(message);
                            break exit;
                        }
                    }
                    // Writer dropped by a shutdown.
                    None => break Exit::Cancelled,
                },

                _ = ticker.tick() => {
                    heartbeat.probe_sent(Instant::now());
                    trace!(probes = heartbeat.probes_sent(), "heartbeat probe");
                    if let Some(exit) = self.write(&mut sink, heartbeat_frame()).await {
                        break exit;
                    }
                }
            }
        };

        let _ = time::timeout(CLOSE_GRACE, sink.close()).await;
        outbound.close();
        while let Ok(message) = outbound.try_recv() {
            unsent.push(message);
        }
        self.restore_unsent(unsent);
        exit
    }

    /// Write one frame. Returns the exit when the write failed, was
    /// cancelled, or stalled past the heartbeat timeout.
    async fn write(&self, sink: &mut FrameSink, payload: String) -> Option<Exit> {
        let limit = self.inner.config.heartbeat_timeout;
        tokio::select! {
            biased;

            () = self.cancel.cancelled() => Some(Exit::Cancelled),

            sent = time::timeout(limit, sink.send(payload)) => match sent {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(Exit::Failed(err)),
                Err(_) => {
                    warn!(
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "socket write stalled"
                    );
                    self.emit_if_current(vec![ConnectionEvent::ConnectionTimeout]);
                    Some(Exit::Failed(ConnectionError::HeartbeatTimeout(limit)))
                }
            },
        }
    }

    /// Decode and publish one inbound frame. Returns whether it was a
    /// heartbeat echo.
    fn handle_frame(&self, text: &str) -> bool {
        match decode_frame(text) {
            Ok(event) => {
                let ack = matches!(event, WireEvent::Heartbeat(_));
                if ack {
                    trace!("heartbeat acknowledged");
                }
                self.emit_if_current(vec![ConnectionEvent::Message(event)]);
                ack
            }
            Err(err) if err.is_reportable() => {
                warn!(error = %err, "dropping undecodable frame");
                self.emit_if_current(vec![ConnectionEvent::Error(err.into())]);
                false
            }
            Err(err) => {
                debug!(error = %err, "ignoring frame");
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // State updates
    // ─────────────────────────────────────────────────────────────────────

    fn current_url(&self) -> Option<Result<Url>> {
        let core = self.inner.core.lock();
        (core.generation == self.generation)
            .then(|| build_socket_url(&self.inner.config.url, &core.token))
    }

    /// Install the socket writer and flush the queue into it.
    fn on_open(&self) -> Option<mpsc::UnboundedReceiver<QueuedMessage>> {
        let mut events = Vec::new();
        let (outbound, flushed) = {
            let mut core = self.inner.core.lock();
            if core.generation != self.generation {
                return None;
            }
            let (writer, outbound) = mpsc::unbounded_channel();
            let mut flushed = 0usize;
            for message in core.queue.drain() {
                // The receiver is held right here.
                let _ = writer.send(message);
                flushed += 1;
            }
            core.writer = Some(writer);
            core.reconnect_attempts = 0;
            core.connected_since = Some(Instant::now());
            core.sockets_opened += 1;
            core.transition(ConnectionState::Connected, &mut events);
            core.resolve_waiters(&Ok(()));
            events.push(ConnectionEvent::Connected);
            (outbound, flushed)
        };
        info!(flushed, "connected");
        self.inner.emit_all(events);
        Some(outbound)
    }

    /// Return frames the dead socket never wrote to the queue head, or to
    /// the writer of a newer socket if one is already open.
    fn restore_unsent(&self, unsent: Vec<QueuedMessage>) {
        if unsent.is_empty() {
            return;
        }
        let (retry, spent): (Vec<_>, Vec<_>) = unsent
            .into_iter()
            .partition(|message| message.attempts < MAX_SEND_ATTEMPTS);

        let mut core = self.inner.core.lock();
        if core.disposed {
            return;
        }
        if core.generation == self.generation {
            core.writer = None;
        }
        let restored = retry.len();
        let evicted = match &core.writer {
            Some(writer) => {
                let mut returned = Vec::new();
                for message in retry {
                    if let Err(mpsc::error::SendError(message)) = writer.send(message) {
                        returned.push(message);
                    }
                }
                core.queue.restore(returned)
            }
            None => core.queue.restore(retry),
        };
        drop(core);

        debug!(restored, "unsent frames returned to the queue");
        if !spent.is_empty() || evicted > 0 {
            warn!(
                dropped = spent.len() + evicted,
                max_attempts = MAX_SEND_ATTEMPTS,
                "dropped outbound frames after repeated socket failures"
            );
        }
    }

    fn on_failure(&self, err: ConnectionError) -> Next {
        let config = &self.inner.config;
        let mut events = Vec::new();
        let next = {
            let mut core = self.inner.core.lock();
            if core.generation != self.generation {
                return Next::Stop;
            }
            let was_connected = core.state == ConnectionState::Connected;
            core.writer = None;
            core.connected_since = None;
            core.resolve_waiters(&Err(err.clone()));
            events.push(ConnectionEvent::Error(err.clone()));
            if was_connected {
                events.push(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::Lost(err.clone()),
                });
            }

            if config.auto_reconnect && config.backoff.allows(core.reconnect_attempts) {
                let attempt = core.reconnect_attempts;
                let delay = config.backoff.jittered_delay(attempt, rand::random::<f64>());
                core.reconnect_attempts += 1;
                core.transition(ConnectionState::Reconnecting, &mut events);
                events.push(ConnectionEvent::Reconnecting {
                    attempt: attempt + 1,
                    delay,
                });
                Next::Retry(delay)
            } else {
                let terminal = if !config.auto_reconnect && was_connected {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Error
                };
                core.transition(terminal, &mut events);
                if config.auto_reconnect {
                    events.push(ConnectionEvent::ReconnectionFailed {
                        attempts: core.reconnect_attempts,
                    });
                }
                core.cancel = None;
                Next::Stop
            }
        };

        match &next {
            Next::Retry(delay) => warn!(
                error = %err,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "connection failed, scheduling reconnect"
            ),
            Next::Stop if config.auto_reconnect => error!(
                error = %err,
                attempts = config.backoff.max_attempts,
                "reconnect attempts exhausted"
            ),
            Next::Stop => warn!(error = %err, "connection failed"),
        }
        self.inner.emit_all(events);
        next
    }

    /// Leave `Reconnecting` for a scheduled retry.
    fn begin_attempt(&self) -> bool {
        let mut events = Vec::new();
        let attempt = {
            let mut core = self.inner.core.lock();
            if core.generation != self.generation {
                return false;
            }
            core.transition(ConnectionState::Connecting, &mut events);
            events.push(ConnectionEvent::ReconnectionAttempt {
                attempt: core.reconnect_attempts,
            });
            core.reconnect_attempts
        };
        info!(
            attempt,
            max_attempts = self.inner.config.backoff.max_attempts,
            "reconnecting"
        );
        self.inner.emit_all(events);
        true
    }

    fn emit_if_current(&self, events: Vec<ConnectionEvent>) {
        if self.inner.core.lock().generation == self.generation {
            self.inner.emit_all(events);
        }
    }
}

fn heartbeat_frame() -> String {
    serde_json::json!({
        "type": "heartbeat",
        "timestamp": Utc::now().timestamp_millis(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_frame_decodes() {
        let frame = heartbeat_frame();
        assert!(matches!(decode_frame(&frame), Ok(WireEvent::Heartbeat(_))));
    }
}
