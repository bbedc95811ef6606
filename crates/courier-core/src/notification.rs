//! Notification envelope: the channel-independent form of a notification.
//!
//! The same logical event may reach the client over the socket and through
//! platform push. Both deliveries normalize to a [`NotificationEnvelope`]
//! carrying the same business `id`, which is the only dedup key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ids::NotificationId;
use crate::wire::{GameEnded, GameStart, MessageNew, WireEvent};

/// Envelope kind for chat messages.
pub const KIND_MESSAGE: &str = "message";
/// Envelope kind for a started match.
pub const KIND_GAME_START: &str = "game_start";
/// Envelope kind for a finished match.
pub const KIND_GAME_ENDED: &str = "game_ended";

/// Channel a notification arrived through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    /// Live realtime socket.
    Websocket,
    /// Platform push delivery.
    Push,
    /// Generated on-device.
    #[default]
    Local,
}

impl NotificationSource {
    /// Default priority for deliveries from this channel.
    #[must_use]
    pub fn default_priority(self) -> NotificationPriority {
        match self {
            Self::Websocket | Self::Local => NotificationPriority::High,
            Self::Push => NotificationPriority::Normal,
        }
    }

    /// Whether deliveries from this channel are shown without a hold-back.
    #[must_use]
    pub fn is_immediate(self) -> bool {
        !matches!(self, Self::Push)
    }
}

/// Display priority hint passed through to the UI layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Background.
    Low,
    /// Regular.
    Normal,
    /// Realtime.
    High,
}

/// A notification normalized across delivery channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    /// Business-assigned identity shared across channels. Missing on
    /// malformed deliveries.
    #[serde(default)]
    pub id: Option<String>,
    /// Notification kind (`message`, `game_start`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Headline.
    #[serde(default)]
    pub title: String,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// Arbitrary payload for the UI layer.
    #[serde(default)]
    pub data: Value,
    /// Conversation the notification belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// User that caused the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Delivery channel.
    #[serde(default)]
    pub source: NotificationSource,
    /// Display priority; filled from the source when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<NotificationPriority>,
    /// When the event happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl NotificationEnvelope {
    /// Build an envelope with empty payload, stamped now.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            kind: kind.into(),
            title: title.into(),
            body: body.into(),
            data: Value::Null,
            conversation_id: None,
            sender_id: None,
            source: NotificationSource::Local,
            priority: None,
            timestamp: Utc::now(),
        }
    }

    /// Dedup identity, or `None` when the id is missing or blank.
    #[must_use]
    pub fn identity(&self) -> Option<NotificationId> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(NotificationId::from)
    }

    /// Set the delivery channel.
    #[must_use]
    pub fn with_source(mut self, source: NotificationSource) -> Self {
        self.source = source;
        self
    }

    /// Set the conversation.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Set the UI payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Effective priority: explicit value or the source default.
    #[must_use]
    pub fn effective_priority(&self) -> NotificationPriority {
        self.priority
            .unwrap_or_else(|| self.source.default_priority())
    }

    /// Derive an envelope from a server frame that warrants a notification.
    ///
    /// Returns `None` for frames that are not user-facing.
    #[must_use]
    pub fn from_wire(event: &WireEvent) -> Option<Self> {
        match event {
            WireEvent::MessageNew(message) => Some(Self::from_message(message)),
            WireEvent::GameStart(start) => Some(Self::from_game_start(start)),
            WireEvent::GameEnded(ended) => Some(Self::from_game_ended(ended)),
            _ => None,
        }
    }

    fn from_message(message: &MessageNew) -> Self {
        Self {
            id: Some(message.id.clone()),
            kind: KIND_MESSAGE.to_owned(),
            title: message.sender.name.clone(),
            body: message.content.clone(),
            data: json!({
                "sequence_number": message.sequence_number,
                "message_id": message.id,
            }),
            conversation_id: Some(message.conversation_id.clone()),
            sender_id: Some(message.sender_id.clone()),
            source: NotificationSource::Websocket,
            priority: None,
            timestamp: message.created_at,
        }
    }

    fn from_game_start(start: &GameStart) -> Self {
        Self {
            id: Some(format!("{}:start", start.game_session_id)),
            kind: KIND_GAME_START.to_owned(),
            title: "New game".to_owned(),
            body: format!("Best of {}", start.best_of),
            data: json!({
                "game_session_id": start.game_session_id,
                "best_of": start.best_of,
            }),
            conversation_id: Some(start.conversation_id.clone()),
            sender_id: Some(start.initiator_id.clone()),
            source: NotificationSource::Websocket,
            priority: None,
            timestamp: start.started_at,
        }
    }

    fn from_game_ended(ended: &GameEnded) -> Self {
        let body = match &ended.winner_id {
            Some(winner) => format!("{winner} won"),
            None => "It's a draw".to_owned(),
        };
        Self {
            id: Some(format!("{}:ended", ended.game_session_id)),
            kind: KIND_GAME_ENDED.to_owned(),
            title: "Game over".to_owned(),
            body,
            data: json!({
                "game_session_id": ended.game_session_id,
                "final_scores": ended.final_scores,
            }),
            conversation_id: None,
            sender_id: ended.winner_id.clone(),
            source: NotificationSource::Websocket,
            priority: None,
            timestamp: ended.completed_at,
        }
    }
}
