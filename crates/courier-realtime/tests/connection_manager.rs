//! Connection lifecycle scenarios over the in-memory transport, on paused
//! Tokio time.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use courier_core::retry::BackoffPolicy;
use courier_core::wire::MessageSend;
use courier_core::{ConnectionState, WireEvent};
use courier_realtime::transport::memory::{MemoryServer, MemoryTransport, OpenOutcome};
use courier_realtime::transport::{SocketPair, Transport};
use courier_realtime::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionManager, DisconnectReason,
};
use futures::{Sink, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Instant};
use url::Url;

fn config() -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://memory/ws".into(),
        auto_reconnect: true,
        backoff: BackoffPolicy {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        },
        heartbeat_interval: Duration::from_secs(3600),
        heartbeat_timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(10),
        max_queue_size: 100,
    }
}

fn setup(config: ConnectionConfig) -> (ConnectionManager, MemoryTransport, MemoryServer) {
    let (transport, server) = MemoryTransport::new();
    let manager = ConnectionManager::new(config, Arc::new(transport.clone()));
    manager.set_token("tok");
    (manager, transport, server)
}

/// Socket whose peer stopped reading: writes never complete and nothing
/// ever arrives.
struct StalledSink {
    dropped: Arc<AtomicBool>,
}

impl Sink<String> for StalledSink {
    type Error = ConnectionError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn start_send(self: Pin<&mut Self>, _item: String) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

impl Drop for StalledSink {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct StalledTransport {
    sink_dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for StalledTransport {
    async fn open(&self, _url: &Url) -> courier_realtime::Result<SocketPair> {
        Ok(SocketPair {
            sink: Box::pin(StalledSink {
                dropped: Arc::clone(&self.sink_dropped),
            }),
            stream: futures::stream::pending().boxed(),
        })
    }
}

fn stalled(config: ConnectionConfig) -> (ConnectionManager, Arc<AtomicBool>) {
    let transport = StalledTransport::default();
    let dropped = Arc::clone(&transport.sink_dropped);
    let manager = ConnectionManager::new(config, Arc::new(transport));
    manager.set_token("tok");
    (manager, dropped)
}

fn stalled_config() -> ConnectionConfig {
    ConnectionConfig {
        auto_reconnect: false,
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout: Duration::from_secs(10),
        ..config()
    }
}

/// Events up to and including the first one matching `pred`.
async fn collect_until(
    rx: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = pred(&event);
                    seen.push(event);
                    if done {
                        return;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event was not emitted");
    seen
}

async fn wait_for(
    rx: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    collect_until(rx, pred).await.pop().unwrap()
}

fn is_connected(event: &ConnectionEvent) -> bool {
    matches!(event, ConnectionEvent::Connected)
}

// ── Connect ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connect_emits_state_change_then_connected() {
    let (manager, _transport, _server) = setup(config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();

    let events = collect_until(&mut rx, is_connected).await;
    assert_eq!(
        events,
        [
            ConnectionEvent::StateChanged {
                new: ConnectionState::Connecting,
                old: ConnectionState::Disconnected,
            },
            ConnectionEvent::StateChanged {
                new: ConnectionState::Connected,
                old: ConnectionState::Connecting,
            },
            ConnectionEvent::Connected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_open_one_socket() {
    let (manager, transport, _server) = setup(config());
    let (a, b, c) = tokio::join!(manager.connect(), manager.connect(), manager.connect());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_without_retry() {
    let (manager, transport, _server) = setup(ConnectionConfig {
        auto_reconnect: false,
        ..config()
    });
    transport.push_outcome(OpenOutcome::Hang);

    let start = Instant::now();
    let result = manager.connect().await;
    assert_matches!(result, Err(ConnectionError::ConnectTimeout(d)) if d == Duration::from_secs(10));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_millis(10_100));
    assert_eq!(manager.state(), ConnectionState::Error);
}

// ── Reconnect ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retries_with_exponential_backoff_until_open() {
    let (manager, transport, _server) = setup(config());
    transport.script([
        OpenOutcome::Refuse("down".into()),
        OpenOutcome::Refuse("still down".into()),
    ]);
    let mut rx = manager.events();

    let start = Instant::now();
    assert_matches!(manager.connect().await, Err(ConnectionError::Transport(r)) if r == "down");
    assert_eq!(manager.state(), ConnectionState::Reconnecting);

    let events = collect_until(&mut rx, is_connected).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3100));

    let delays: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        [(1, Duration::from_secs(1)), (2, Duration::from_secs(2))]
    );
    let attempts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::ReconnectionAttempt { attempt } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, [1, 2]);

    assert_eq!(transport.open_count(), 3);
    assert_eq!(manager.reconnect_attempts(), 0);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_land_in_error() {
    let (manager, transport, _server) = setup(config());
    transport.script((0..4).map(|n| OpenOutcome::Refuse(format!("refusal {n}"))));
    let mut rx = manager.events();

    let _ = manager.connect().await;
    let events = collect_until(&mut rx, |e| {
        matches!(e, ConnectionEvent::ReconnectionFailed { .. })
    })
    .await;

    assert_matches!(
        events.last(),
        Some(ConnectionEvent::ReconnectionFailed { attempts: 3 })
    );
    assert_eq!(manager.state(), ConnectionState::Error);
    assert_eq!(manager.reconnect_attempts(), 3);
    assert_eq!(transport.open_count(), 4);

    // Nothing further is scheduled.
    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(transport.open_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_after_exhaustion_starts_fresh() {
    let (manager, transport, _server) = setup(ConnectionConfig {
        backoff: BackoffPolicy {
            max_attempts: 1,
            ..config().backoff
        },
        ..config()
    });
    transport.script([
        OpenOutcome::Refuse("a".into()),
        OpenOutcome::Refuse("b".into()),
    ]);
    let mut rx = manager.events();
    let _ = manager.connect().await;
    let _ = wait_for(&mut rx, |e| {
        matches!(e, ConnectionEvent::ReconnectionFailed { .. })
    })
    .await;
    assert_eq!(manager.state(), ConnectionState::Error);

    manager.connect().await.unwrap();
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(transport.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn server_close_triggers_reconnect() {
    let (manager, transport, mut server) = setup(config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let mut first = server.accept().await.unwrap();

    first.close();
    let event = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_matches!(
        event,
        ConnectionEvent::Disconnected {
            reason: DisconnectReason::Lost(ConnectionError::Closed(_))
        }
    );

    let _ = wait_for(&mut rx, is_connected).await;
    assert!(server.accept().await.is_some());
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn close_without_auto_reconnect_goes_idle() {
    let (manager, transport, mut server) = setup(ConnectionConfig {
        auto_reconnect: false,
        ..config()
    });
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();

    peer.close();
    let _ = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_during_backoff_cancels_retry() {
    let (manager, transport, _server) = setup(config());
    transport.push_outcome(OpenOutcome::Refuse("down".into()));

    let _ = manager.connect().await;
    assert_eq!(manager.state(), ConnectionState::Reconnecting);
    manager.disconnect();

    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_connect() {
    let (manager, transport, _server) = setup(config());
    transport.push_outcome(OpenOutcome::Hang);

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    while manager.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    manager.disconnect();
    assert_matches!(pending.await.unwrap(), Err(ConnectionError::Cancelled));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// ── Heartbeat ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_and_reconnects() {
    let (manager, transport, mut server) = setup(ConnectionConfig {
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout: Duration::from_secs(10),
        ..config()
    });
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let mut silent = server.accept().await.unwrap();
    let start = Instant::now();

    let _ = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::ConnectionTimeout)).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_millis(40_100));

    let probe: serde_json::Value = serde_json::from_str(&silent.try_recv().unwrap()).unwrap();
    assert_eq!(probe["type"], "heartbeat");
    assert!(probe["timestamp"].is_i64());

    let _ = wait_for(&mut rx, is_connected).await;
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn answered_heartbeats_keep_connection() {
    let (manager, transport, mut server) = setup(ConnectionConfig {
        heartbeat_interval: Duration::from_secs(30),
        heartbeat_timeout: Duration::from_secs(10),
        ..config()
    });
    manager.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    let echo = tokio::spawn(async move {
        let mut echoed = 0;
        while let Some(frame) = peer.recv().await {
            let _ = peer.send_text(frame);
            echoed += 1;
        }
        echoed
    });

    time::sleep(Duration::from_secs(295)).await;
    assert!(manager.is_connected());
    assert_eq!(transport.open_count(), 1);

    manager.disconnect();
    assert_eq!(echo.await.unwrap(), 9);
}

#[tokio::test(start_paused = true)]
async fn stalled_write_times_out() {
    let (manager, _dropped) = stalled(stalled_config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let start = Instant::now();
    assert!(manager.send_message(&json!({"type": "chat.join"})).unwrap());

    let _ = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::ConnectionTimeout)).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11));

    let lost = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::Disconnected { .. })).await;
    assert_matches!(
        lost,
        ConnectionEvent::Disconnected {
            reason: DisconnectReason::Lost(ConnectionError::HeartbeatTimeout(_))
        }
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    // The frame never reached the wire.
    assert_eq!(manager.queue_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_heartbeat_times_out() {
    let (manager, _dropped) = stalled(stalled_config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let start = Instant::now();

    let _ = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::ConnectionTimeout)).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
    assert!(!manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn disconnect_releases_stalled_socket() {
    let (manager, dropped) = stalled(stalled_config());
    manager.connect().await.unwrap();
    assert!(manager.send_message(&json!({"n": 1})).unwrap());
    time::sleep(Duration::from_secs(1)).await;

    manager.disconnect();
    time::sleep(Duration::from_secs(2)).await;
    assert!(dropped.load(Ordering::SeqCst));
    assert_eq!(manager.queue_len(), 1);
}

// ── Outbound queue ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn queued_messages_flush_in_order_on_connect() {
    let (manager, _transport, mut server) = setup(config());
    for n in 0..3 {
        let sent = manager
            .send_message(&WireEvent::MessageSend(MessageSend::new(
                "conv-1",
                format!("m{n}"),
            )))
            .unwrap();
        assert!(!sent);
    }
    assert_eq!(manager.queue_len(), 3);

    manager.connect().await.unwrap();
    assert_eq!(manager.queue_len(), 0);
    assert!(manager.send_message(&json!({"type": "chat.join"})).unwrap());

    let mut peer = server.accept().await.unwrap();
    for n in 0..3 {
        let frame = peer.recv_json().await.unwrap();
        assert_eq!(frame["type"], "message.send");
        assert_eq!(frame["content"], format!("m{n}"));
    }
    assert_eq!(peer.recv_json().await.unwrap()["type"], "chat.join");
}

#[tokio::test(start_paused = true)]
async fn messages_sent_while_reconnecting_survive() {
    let (manager, _transport, mut server) = setup(config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let mut first = server.accept().await.unwrap();

    first.close();
    let _ = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::Reconnecting { .. })).await;
    for n in 0..3 {
        assert!(!manager.send_message(&json!({"n": n})).unwrap());
    }

    let _ = wait_for(&mut rx, is_connected).await;
    let mut second = server.accept().await.unwrap();
    for n in 0..3 {
        assert_eq!(second.recv_json().await.unwrap()["n"], n);
    }
}

#[tokio::test(start_paused = true)]
async fn unwritten_frames_return_to_queue_on_disconnect() {
    let (manager, _transport, mut server) = setup(config());
    manager.connect().await.unwrap();
    let _first = server.accept().await.unwrap();

    // Accepted by the writer, but the driver never runs before the close.
    assert!(manager.send_message(&json!({"n": 1})).unwrap());
    manager.disconnect();
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.queue_len(), 1);

    manager.connect().await.unwrap();
    let mut second = server.accept().await.unwrap();
    assert_eq!(second.recv_json().await.unwrap()["n"], 1);
    assert_eq!(manager.queue_len(), 0);
}

// ── Token rotation ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn update_token_reopens_with_new_token() {
    let (manager, transport, mut server) = setup(config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let mut old = server.accept().await.unwrap();

    manager.update_token("fresh").await.unwrap();
    let new = server.accept().await.unwrap();
    assert_eq!(new.url().query(), Some("token=fresh"));
    assert!(old.recv().await.is_none());
    assert_eq!(transport.open_count(), 2);

    let _ = wait_for(&mut rx, |e| {
        matches!(
            e,
            ConnectionEvent::Disconnected {
                reason: DisconnectReason::TokenRefresh
            }
        )
    })
    .await;
    let _ = wait_for(&mut rx, is_connected).await;
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn update_token_while_idle_stays_idle() {
    let (manager, transport, mut server) = setup(config());
    manager.update_token("later").await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(transport.open_count(), 0);

    manager.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    assert_eq!(peer.url().query(), Some("token=later"));
}

// ── Inbound frames ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn inbound_frames_are_decoded() {
    let (manager, _transport, mut server) = setup(config());
    let mut rx = manager.events();
    manager.connect().await.unwrap();
    let peer = server.accept().await.unwrap();

    assert!(peer.send_json(&json!({
        "type": "message.ack",
        "client_nonce": "n-1",
        "message_id": "m-1",
        "sequence_number": 7,
        "sent_at": "2026-01-01T00:00:00Z",
    })));
    let event = wait_for(&mut rx, |e| matches!(e, ConnectionEvent::Message(_))).await;
    assert_matches!(
        event,
        ConnectionEvent::Message(WireEvent::MessageAck(ack)) if ack.sequence_number == 7
    );

    // Unknown types are dropped quietly; invalid JSON surfaces as an error.
    assert!(peer.send_json(&json!({"type": "presence.update"})));
    assert!(peer.send_text("{not json"));
    let event = wait_for(&mut rx, |e| {
        matches!(e, ConnectionEvent::Message(_) | ConnectionEvent::Error(_))
    })
    .await;
    assert_matches!(event, ConnectionEvent::Error(ConnectionError::Protocol(_)));
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn listener_may_send_from_callback() {
    let (manager, _transport, mut server) = setup(config());
    let sender = manager.clone();
    let _id = manager.subscribe_fn(move |event: &ConnectionEvent| {
        if matches!(event, ConnectionEvent::Connected) {
            let _ = sender.send_message(&json!({"type": "chat.join"}));
        }
    });

    manager.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    assert_eq!(peer.recv_json().await.unwrap()["type"], "chat.join");
}
