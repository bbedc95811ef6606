//! JSON-lines rendering of events for stdout.

use std::io::Write;

use courier_realtime::{ArbiterEvent, ConnectionEvent, Decision, DisconnectReason};
use serde_json::{Value, json};

/// Write one JSON value as a line on stdout.
pub fn emit(value: &Value) {
    let mut out = std::io::stdout().lock();
    // A closed stdout is not worth crashing the session over.
    let _ = writeln!(out, "{value}");
}

/// Render a connection event.
pub fn connection_event(event: &ConnectionEvent) -> Value {
    let name = event.name();
    match event {
        ConnectionEvent::Connected | ConnectionEvent::ConnectionTimeout => json!({"event": name}),
        ConnectionEvent::Disconnected { reason } => json!({
            "event": name,
            "reason": reason.as_str(),
            "error": lost_error(reason),
        }),
        ConnectionEvent::Reconnecting { attempt, delay } => json!({
            "event": name,
            "attempt": attempt,
            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }),
        ConnectionEvent::ReconnectionAttempt { attempt } => json!({"event": name, "attempt": attempt}),
        ConnectionEvent::ReconnectionFailed { attempts } => json!({"event": name, "attempts": attempts}),
        ConnectionEvent::StateChanged { new, old } => json!({"event": name, "new": new, "old": old}),
        ConnectionEvent::Message(frame) => json!({"event": name, "frame": frame}),
        ConnectionEvent::Error(err) => json!({"event": name, "error": err.to_string()}),
    }
}

fn lost_error(reason: &DisconnectReason) -> Value {
    match reason {
        DisconnectReason::Lost(err) => Value::String(err.to_string()),
        _ => Value::Null,
    }
}

/// Render an arbiter event.
pub fn arbiter_event(event: &ArbiterEvent) -> Value {
    match event {
        ArbiterEvent::Displayed(shown) => json!({
            "event": "notification_displayed",
            "id": shown.id,
            "shownAt": shown.shown_at,
            "notification": shown.envelope,
        }),
        ArbiterEvent::Suppressed { id, source, reason } => json!({
            "event": "notification_suppressed",
            "id": id,
            "source": source,
            "reason": reason,
        }),
        ArbiterEvent::Hidden { id } => json!({"event": "notification_hidden", "id": id}),
    }
}

/// Render an arbiter decision.
pub fn decision(decision: &Decision) -> Value {
    match decision {
        Decision::Shown(id) => json!({"decision": "shown", "id": id}),
        Decision::Deferred { id, delay } => json!({
            "decision": "deferred",
            "id": id,
            "delayMs": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }),
        Decision::Preempted(id) => json!({"decision": "preempted", "id": id}),
        Decision::Suppressed { id, reason } => json!({
            "decision": "suppressed",
            "id": id,
            "reason": reason,
        }),
    }
}
