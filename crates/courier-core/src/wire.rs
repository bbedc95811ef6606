//! Realtime wire protocol.
//!
//! Every frame is a JSON text message discriminated by a dot-separated
//! `type` field. [`WireEvent`] is the closed set of frames the client knows
//! about; [`decode_frame`] separates "not JSON" from "JSON we don't know"
//! so callers can report the former and merely log the latter.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};
use crate::ids::ClientNonce;

/// Which side originates a frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the client.
    ClientToServer,
    /// Sent by the server.
    ServerToClient,
    /// Either side may send it.
    Both,
}

/// Liveness probe. The server may echo it back as an acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unix epoch milliseconds when the probe was sent.
    pub timestamp: i64,
}

impl Heartbeat {
    /// A heartbeat stamped with the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Request to join a conversation room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatJoin {
    /// Conversation to join.
    pub conversation_id: String,
    /// Joining user.
    pub user_id: String,
}

/// Server confirmation of a room join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatJoined {
    /// Joined conversation.
    pub conversation_id: String,
    /// Joined user.
    pub user_id: String,
    /// When the server registered the join.
    pub joined_at: DateTime<Utc>,
}

/// Outbound chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSend {
    /// Target conversation.
    pub conversation_id: String,
    /// Message text.
    pub content: String,
    /// Correlates the later `message.ack`.
    pub client_nonce: ClientNonce,
    /// Client send time.
    pub sent_at: DateTime<Utc>,
}

impl MessageSend {
    /// Build a message with a fresh nonce stamped now.
    pub fn new(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            client_nonce: ClientNonce::new(),
            sent_at: Utc::now(),
        }
    }
}

/// Server acknowledgement of a `message.send`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAck {
    /// Nonce from the acknowledged send.
    pub client_nonce: ClientNonce,
    /// Server-assigned message id.
    pub message_id: String,
    /// Position in the conversation.
    pub sequence_number: i64,
    /// Original client send time.
    pub sent_at: DateTime<Utc>,
}

/// Author details attached to `message.new`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageSender {
    /// Sender user id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Opaque profile payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

/// A message delivered to a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageNew {
    /// Server message id. Push deliveries of the same message carry it too.
    pub id: String,
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Author user id.
    pub sender_id: String,
    /// Message text.
    pub content: String,
    /// Position in the conversation.
    pub sequence_number: i64,
    /// Nonce of the originating send, absent for server-generated messages.
    #[serde(default)]
    pub client_nonce: Option<ClientNonce>,
    /// Client send time.
    pub sent_at: DateTime<Utc>,
    /// Server persist time.
    pub created_at: DateTime<Utc>,
    /// Author details.
    pub sender: MessageSender,
}

/// A rock-paper-scissors match was started in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStart {
    /// Hosting conversation.
    pub conversation_id: String,
    /// Game session id.
    pub game_session_id: String,
    /// Player who started the match.
    pub initiator_id: String,
    /// Number of rounds in the match.
    pub best_of: u32,
    /// Start time.
    pub started_at: DateTime<Utc>,
}

/// A player's move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameChoice {
    /// Rock.
    Rock,
    /// Paper.
    Paper,
    /// Scissors.
    Scissors,
}

/// A move submitted for one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePlay {
    /// Game session id.
    pub game_session_id: String,
    /// One-based round number.
    pub round_number: u32,
    /// The move.
    pub choice: GameChoice,
    /// Player submitting the move.
    pub player_id: String,
}

/// Final result of a match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEnded {
    /// Game session id.
    pub game_session_id: String,
    /// Winner, absent on a draw.
    #[serde(default)]
    pub winner_id: Option<String>,
    /// Rounds won per player id.
    pub final_scores: HashMap<String, u32>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// Every frame type the protocol defines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireEvent {
    /// Liveness probe / acknowledgement.
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    /// Join a conversation.
    #[serde(rename = "chat.join")]
    ChatJoin(ChatJoin),
    /// Join confirmed.
    #[serde(rename = "chat.joined")]
    ChatJoined(ChatJoined),
    /// Send a message.
    #[serde(rename = "message.send")]
    MessageSend(MessageSend),
    /// Send acknowledged.
    #[serde(rename = "message.ack")]
    MessageAck(MessageAck),
    /// New message in a conversation.
    #[serde(rename = "message.new")]
    MessageNew(MessageNew),
    /// Match started.
    #[serde(rename = "game.start")]
    GameStart(GameStart),
    /// Move submitted.
    #[serde(rename = "game.play")]
    GamePlay(GamePlay),
    /// Match finished.
    #[serde(rename = "game.ended")]
    GameEnded(GameEnded),
}

/// All `type` discriminators the protocol defines.
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "heartbeat",
    "chat.join",
    "chat.joined",
    "message.send",
    "message.ack",
    "message.new",
    "game.start",
    "game.play",
    "game.ended",
];

impl WireEvent {
    /// The `type` discriminator of this frame.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::ChatJoin(_) => "chat.join",
            Self::ChatJoined(_) => "chat.joined",
            Self::MessageSend(_) => "message.send",
            Self::MessageAck(_) => "message.ack",
            Self::MessageNew(_) => "message.new",
            Self::GameStart(_) => "game.start",
            Self::GamePlay(_) => "game.play",
            Self::GameEnded(_) => "game.ended",
        }
    }

    /// Which side originates this frame type.
    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            Self::Heartbeat(_) => Direction::Both,
            Self::ChatJoin(_) | Self::MessageSend(_) | Self::GamePlay(_) => {
                Direction::ClientToServer
            }
            Self::ChatJoined(_)
            | Self::MessageAck(_)
            | Self::MessageNew(_)
            | Self::GameStart(_)
            | Self::GameEnded(_) => Direction::ServerToClient,
        }
    }

    /// Whether this is a `game.*` frame.
    #[must_use]
    pub fn is_game_event(&self) -> bool {
        matches!(
            self,
            Self::GameStart(_) | Self::GamePlay(_) | Self::GameEnded(_)
        )
    }
}

/// Decode a text frame into a [`WireEvent`].
pub fn decode_frame(text: &str) -> Result<WireEvent> {
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    let event_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_owned();
    if !KNOWN_EVENT_TYPES.contains(&event_type.as_str()) {
        return Err(ProtocolError::UnknownType(event_type));
    }
    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { event_type, source })
}
