//! Line commands read from stdin.
//!
//! A line starting with `{` is a raw frame to send. Anything else must be a
//! `:`-prefixed command:
//!
//! ```text
//! :push {envelope}    feed a push delivery to the arbiter
//! :local {envelope}   feed a local delivery to the arbiter
//! :hide <id>          dismiss a notification
//! :token <token>      rotate the auth token
//! :connect | :disconnect | :status | :stats | :clear | :quit
//! ```

use std::str::FromStr;

use courier_core::NotificationEnvelope;
use serde_json::Value;
use thiserror::Error;

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send a raw JSON frame.
    Send(Value),
    /// Arbitrate a push delivery.
    Push(NotificationEnvelope),
    /// Arbitrate a local delivery.
    Local(NotificationEnvelope),
    /// Dismiss a notification.
    Hide(String),
    /// Rotate the auth token.
    Token(String),
    /// Connect if idle.
    Connect,
    /// Close the socket.
    Disconnect,
    /// Print connection status.
    Status,
    /// Print arbiter counters.
    Stats,
    /// Drop queued outbound frames.
    Clear,
    /// Exit.
    Quit,
}

/// Why a line could not be parsed.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Blank line.
    #[error("empty line")]
    Empty,
    /// Unrecognized `:command`.
    #[error("unknown command `{0}`")]
    Unknown(String),
    /// A command that needs an argument got none.
    #[error("`:{0}` needs an argument")]
    MissingArgument(&'static str),
    /// A JSON argument failed to parse.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        if line.starts_with('{') {
            return Ok(Self::Send(serde_json::from_str(line)?));
        }

        let Some(rest) = line.strip_prefix(':') else {
            return Err(CommandError::Unknown(line.to_owned()));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        match name {
            "push" => Ok(Self::Push(serde_json::from_str(required("push", arg)?)?)),
            "local" => Ok(Self::Local(serde_json::from_str(required("local", arg)?)?)),
            "hide" => Ok(Self::Hide(required("hide", arg)?.to_owned())),
            "token" => Ok(Self::Token(required("token", arg)?.to_owned())),
            "connect" => Ok(Self::Connect),
            "disconnect" => Ok(Self::Disconnect),
            "status" => Ok(Self::Status),
            "stats" => Ok(Self::Stats),
            "clear" => Ok(Self::Clear),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_owned())),
        }
    }
}

fn required<'a>(name: &'static str, arg: &'a str) -> Result<&'a str, CommandError> {
    if arg.is_empty() {
        Err(CommandError::MissingArgument(name))
    } else {
        Ok(arg)
    }
}
