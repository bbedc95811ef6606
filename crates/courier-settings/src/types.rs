//! Settings schema.
//!
//! Field names serialize in camelCase to match the settings file. Every
//! struct uses `#[serde(default)]` so a partial file only overrides the keys
//! it names.

use std::time::Duration;

use courier_core::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Realtime socket settings.
    pub connection: ConnectionSettings,
    /// Notification arbitration settings.
    pub notifications: NotificationSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.notifications.validate()
    }
}

/// Realtime socket settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Base WebSocket URL; the auth token is appended as a query parameter.
    pub url: String,
    /// Reconnect automatically after a close, error, or heartbeat timeout.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Backoff base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Symmetric jitter applied to backoff delays (0.0–1.0).
    pub jitter_factor: f64,
    /// Interval between heartbeat probes in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Time allowed for server traffic after a probe, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Time allowed for a socket to open, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Outbound messages buffered while disconnected.
    pub max_queue_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            auto_reconnect: true,
            max_reconnect_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            max_queue_size: 100,
        }
    }
}

impl ConnectionSettings {
    /// Backoff policy built from the reconnect fields.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor,
        }
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(invalid(format!(
                "connection.url must use ws:// or wss://, got `{}`",
                self.url
            )));
        }
        for (name, value) in [
            ("connection.baseDelayMs", self.base_delay_ms),
            ("connection.heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("connection.heartbeatTimeoutMs", self.heartbeat_timeout_ms),
            ("connection.connectTimeoutMs", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(format!("{name} must be > 0")));
            }
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(invalid(format!(
                "connection.baseDelayMs ({}) exceeds connection.maxDelayMs ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(invalid("connection.jitterFactor must be within 0.0..=1.0"));
        }
        if self.max_queue_size == 0 {
            return Err(invalid("connection.maxQueueSize must be > 0"));
        }
        Ok(())
    }
}

/// Notification arbitration settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Window after first sight of an id in which repeats are suppressed.
    pub dedup_window_ms: u64,
    /// Hold-back applied to push deliveries so a socket delivery can win.
    pub priority_delay_ms: u64,
    /// Upper bound on remembered ids.
    pub max_history: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            dedup_window_ms: 5000,
            priority_delay_ms: 1000,
            max_history: 500,
        }
    }
}

impl NotificationSettings {
    /// Dedup window as a `Duration`.
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Priority delay as a `Duration`.
    pub fn priority_delay(&self) -> Duration {
        Duration::from_millis(self.priority_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.dedup_window_ms == 0 {
            return Err(invalid("notifications.dedupWindowMs must be > 0"));
        }
        if self.priority_delay_ms >= self.dedup_window_ms {
            return Err(invalid(format!(
                "notifications.priorityDelayMs ({}) must be below notifications.dedupWindowMs ({})",
                self.priority_delay_ms, self.dedup_window_ms
            )));
        }
        if self.max_history == 0 {
            return Err(invalid("notifications.maxHistory must be > 0"));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}
