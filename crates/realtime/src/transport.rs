//! WebSocket transport seam.
//!
//! The connection state machine talks to a [`Transport`] rather than to
//! tokio-tungstenite directly, so tests can drive it against a scripted
//! peer. [`WsTransport`] is the production implementation; it answers pings,
//! ignores binary frames, and surfaces close frames with their code.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{RealtimeError, Result};
use crate::handlers::DisconnectReason;

/// An inbound frame as seen by the connection state machine.
#[derive(Debug)]
pub enum Frame {
    /// A text frame, expected to carry a JSON event.
    Text(String),
    /// The peer closed the stream.
    Closed(DisconnectReason),
}

/// Opens physical streams.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportStream>>;
}

/// A live duplex stream for one channel.
#[async_trait]
pub trait TransportStream: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// The next frame, or `None` once the stream is exhausted.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;

    async fn close(&mut self) -> Result<()>;
}

/// Production transport over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportStream>> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                RealtimeError::WebSocket(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                ))
            })??;
        Ok(Box::new(WsStream { inner: stream }))
    }
}

struct WsStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportStream for WsStream {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(Into::into)
    }

    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.to_string()))),
                Ok(Message::Ping(payload)) => {
                    if let Err(err) = self.inner.send(Message::Pong(payload)).await {
                        return Some(Err(err.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    let reason = match frame {
                        Some(f) => {
                            DisconnectReason::with_code(f.reason.to_string(), u16::from(f.code))
                        }
                        None => DisconnectReason::new("closed by peer"),
                    };
                    return Some(Ok(Frame::Closed(reason)));
                }
                Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close(None).await.map_err(Into::into)
    }
}
