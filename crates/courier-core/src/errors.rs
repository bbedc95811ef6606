//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding an inbound wire frame.
///
/// None of these affect connection state: the offending frame is logged and
/// discarded by the caller.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The frame was JSON but had no string `type` field.
    #[error("frame has no `type` discriminator")]
    MissingType,
    /// The `type` discriminator is not part of the protocol.
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    /// A known frame type with missing or mistyped fields.
    #[error("malformed `{event_type}` frame: {source}")]
    Malformed {
        /// The frame's `type` value.
        event_type: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Whether the frame should be reported as an error event.
    ///
    /// Unknown types come from newer servers and are only logged; everything
    /// else indicates a broken frame.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::UnknownType(_))
    }
}

/// Result alias for wire decoding.
pub type Result<T> = std::result::Result<T, ProtocolError>;
