//! Notification arbitration and the socket-to-arbiter bridge.

pub mod arbiter;
pub mod bridge;

pub use arbiter::{
    ArbiterEvent, ArbiterStats, Decision, DisplayedNotification, NotificationArbiter,
    PendingDisplay, SuppressReason,
};
pub use bridge::NotificationBridge;
