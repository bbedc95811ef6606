//! # courier-core
//!
//! Shared vocabulary for the Courier realtime client:
//!
//! - **Wire protocol**: [`wire::WireEvent`] tagged union and [`wire::decode_frame`]
//! - **Connection state**: [`state::ConnectionState`]
//! - **Notifications**: [`notification::NotificationEnvelope`] and its source/priority
//! - **Branded IDs**: [`ids::NotificationId`], [`ids::ClientNonce`]
//! - **Backoff**: [`retry::BackoffPolicy`] and the delay math
//! - **Event bus**: [`bus::EventBus`] with the [`bus::Listener`] capability trait
//! - **Logging**: subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod notification;
pub mod retry;
pub mod state;
pub mod wire;

pub use bus::{EventBus, Listener, SubscriptionId};
pub use errors::ProtocolError;
pub use ids::{ClientNonce, NotificationId};
pub use notification::{NotificationEnvelope, NotificationPriority, NotificationSource};
pub use retry::BackoffPolicy;
pub use state::ConnectionState;
pub use wire::WireEvent;
