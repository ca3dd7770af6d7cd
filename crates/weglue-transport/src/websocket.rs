//! WebSocket transport adapter
//!
//! Client adapter over `tokio-tungstenite`. Frames travel as JSON text
//! messages; protocol pings are answered by the library during reads. A
//! close frame or the end of the stream maps to `recv() -> Ok(None)`, which
//! the connection manager treats as a session drop.

use crate::traits::{Transport, TransportSession};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use weglue_core::{ClientFrame, Result, ServerFrame, WeglueError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport handle for a WebSocket messaging backend.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a handle for the given `ws://` / `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Box<dyn TransportSession>> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| WeglueError::transport(format!("websocket connect: {err}")))?;
        debug!(url = %self.url, "websocket session established");
        let (sink, source) = stream.split();
        Ok(Box::new(WebSocketSession {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        }))
    }

    fn transport_type(&self) -> &'static str {
        "websocket"
    }
}

struct WebSocketSession {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    source: Mutex<SplitStream<WsStream>>,
}

#[async_trait]
impl TransportSession for WebSocketSession {
    async fn send(&self, frame: ClientFrame) -> Result<()> {
        let json = serde_json::to_string(&frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(WsMessage::Text(json))
            .await
            .map_err(|err| WeglueError::transport(format!("websocket send: {err}")))
    }

    async fn recv(&self) -> Result<Option<ServerFrame>> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(err) => {
                        // Unknown events from the backend are skipped, not fatal.
                        warn!(%err, "discarding unparseable frame");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/binary
                Some(Err(err)) => {
                    return Err(WeglueError::transport(format!("websocket recv: {err}")))
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        // Best effort; the peer may already be gone.
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.close().await;
        Ok(())
    }
}
