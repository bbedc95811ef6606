//! Runtime configuration for the connection manager and the arbiter.

use std::time::Duration;

use courier_core::retry::BackoffPolicy;
use courier_settings::{ConnectionSettings, NotificationSettings};

/// Connection manager configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// Base socket URL; the auth token is added as `token=` query parameter.
    pub url: String,
    /// Reconnect after close, error, or heartbeat timeout.
    pub auto_reconnect: bool,
    /// Reconnect backoff and attempt ceiling.
    pub backoff: BackoffPolicy,
    /// Interval between heartbeat probes.
    pub heartbeat_interval: Duration,
    /// Time allowed for server traffic after a probe.
    pub heartbeat_timeout: Duration,
    /// Time allowed for the transport to open.
    pub connect_timeout: Duration,
    /// Outbound messages buffered while not connected.
    pub max_queue_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            url: settings.url.clone(),
            auto_reconnect: settings.auto_reconnect,
            backoff: settings.backoff_policy(),
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            connect_timeout: settings.connect_timeout(),
            max_queue_size: settings.max_queue_size.max(1),
        }
    }
}

impl ConnectionConfig {
    /// Config pointing at `url` with every other value defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Notification arbiter configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbiterConfig {
    /// Window after first sight of an id in which repeats are suppressed.
    pub dedup_window: Duration,
    /// Hold-back applied to push deliveries.
    pub priority_delay: Duration,
    /// Upper bound on remembered ids.
    pub max_history: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::from(&NotificationSettings::default())
    }
}

impl From<&NotificationSettings> for ArbiterConfig {
    fn from(settings: &NotificationSettings) -> Self {
        Self {
            dedup_window: settings.dedup_window(),
            priority_delay: settings.priority_delay(),
            max_history: settings.max_history.max(1),
        }
    }
}
