//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use super::{SocketPair, Transport};
use crate::errors::{ConnectionError, Result};

/// Production transport: a client WebSocket per `open`.
///
/// Only text frames are surfaced. Binary frames holding UTF-8 are passed
/// through as text; control frames are handled by tungstenite.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create the transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, url: &Url) -> Result<SocketPair> {
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        debug!(status = %response.status(), host = url.host_str().unwrap_or(""), "websocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| ConnectionError::Transport(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, ConnectionError>(Message::text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "close frame received");
                    None
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            })
        });

        Ok(SocketPair {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}
