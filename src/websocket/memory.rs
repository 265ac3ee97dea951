//! In-process transport.
//!
//! `MemoryConnector` hands every accepted connection to a `MemoryServer`
//! as a `MemoryPeer`, which plays the server side of the socket. Used for
//! offline runs and for exercising the connection lifecycle without a
//! network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientError;

use super::message::InboundFrame;
use super::transport::{Connector, Transport};

/// What the server side observes from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Text(String),
    Closed,
}

enum PeerFrame {
    Frame(InboundFrame),
    Error(String),
}

/// Connector producing in-memory connections
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    urls: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    refusals: AtomicUsize,
    stalled: AtomicBool,
    close_stalled: AtomicBool,
}

/// Receives the server side of each connection
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted: tx,
            urls: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            refusals: AtomicUsize::new(0),
            stalled: AtomicBool::new(false),
            close_stalled: AtomicBool::new(false),
        };
        (connector, MemoryServer { accepted: rx })
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Make handshakes hang until the attempt is dropped
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make the close handshake of connections opened from now on hang
    pub fn set_close_stalled(&self, stalled: bool) {
        self.close_stalled.store(stalled, Ordering::SeqCst);
    }

    /// Number of `connect` calls so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// URLs of every connection attempt, oldest first
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().map(|urls| urls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.urls.lock() {
            urls.push(url.to_string());
        }

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ClientError::transport("connection refused"));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            to_client: Some(to_client),
            from_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| ClientError::transport("server unavailable"))?;

        Ok(Box::new(MemoryTransport {
            incoming,
            outgoing: Some(outgoing),
            close_stalled: self.close_stalled.load(Ordering::SeqCst),
        }))
    }
}

impl MemoryServer {
    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.try_recv().ok()
    }
}

/// Server side of one in-memory connection.
///
/// Dropping the peer (or calling `close`) closes the connection from the
/// server side.
pub struct MemoryPeer {
    url: String,
    to_client: Option<mpsc::UnboundedSender<PeerFrame>>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
}

impl MemoryPeer {
    /// URL the client connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a text frame; false if the client side is gone
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(PeerFrame::Frame(InboundFrame::Text(text.into())))
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    pub fn send_binary(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.push(PeerFrame::Frame(InboundFrame::Binary(bytes.into())))
    }

    /// Report a transport error to the client without closing
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.push(PeerFrame::Error(reason.into()))
    }

    /// Close from the server side
    pub fn close(&mut self) {
        self.to_client = None;
    }

    /// Next event from the client; `None` once the client side is gone
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.from_client.try_recv().ok()
    }

    fn push(&self, frame: PeerFrame) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<PeerFrame>,
    outgoing: Option<mpsc::UnboundedSender<ClientEvent>>,
    close_stalled: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_text(&mut self, text: String) -> Result<(), ClientError> {
        let tx = self
            .outgoing
            .as_ref()
            .ok_or_else(|| ClientError::transport("connection closed"))?;
        tx.send(ClientEvent::Text(text))
            .map_err(|_| ClientError::transport("peer went away"))
    }

    async fn next_frame(&mut self) -> Option<Result<InboundFrame, ClientError>> {
        match self.incoming.recv().await? {
            PeerFrame::Frame(frame) => Some(Ok(frame)),
            PeerFrame::Error(reason) => Some(Err(ClientError::Transport(reason))),
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        if self.close_stalled {
            std::future::pending::<()>().await;
        }
        if let Some(tx) = self.outgoing.take() {
            let _ = tx.send(ClientEvent::Closed);
        }
        self.incoming.close();
        Ok(())
    }
}
