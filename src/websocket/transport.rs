//! Transport seam between the connection manager and the network.
//!
//! `Connector` performs the handshake and yields a `Transport` that carries
//! text frames both ways. `WsConnector` is the `tokio-tungstenite` client used
//! against real `ws://` / `wss://` endpoints.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

use super::message::InboundFrame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens connections to a notification endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    /// Perform the handshake against `url`
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError>;
}

/// One established connection
#[async_trait]
pub trait Transport: Send {
    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<(), ClientError>;

    /// Next data frame.
    ///
    /// Returns `None` once the connection is closed. An `Err` reports a
    /// transport error without closing; the close is reported by a later
    /// `None`. Must be cancel-safe.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ClientError>>;

    /// Request closure. Closing an already closed transport is not an error.
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError> {
        let (stream, response) = connect_async(url).await?;
        tracing::debug!(status = %response.status(), "WebSocket handshake completed");
        Ok(Box::new(WsTransport {
            stream,
            finished: false,
        }))
    }
}

/// `tokio-tungstenite` stream adapted to `Transport`.
///
/// Protocol-level ping/pong frames are answered by tungstenite itself and
/// never surface here.
pub struct WsTransport {
    stream: WsStream,
    finished: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ClientError>> {
        if self.finished {
            return None;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(Ok(InboundFrame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Some(Ok(InboundFrame::Binary(data.to_vec())));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Server sent close frame");
                    self.finished = true;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.finished = true;
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
