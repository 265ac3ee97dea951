//! Connection state, options and the inbound message stream

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::config::{EndpointConfig, Settings};
use crate::websocket::InboundMessage;

use super::backoff::BackoffConfig;

/// Lifecycle state of the notification connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No token supplied yet
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }

    /// Gauge value used by the state metric
    pub fn metric_code(&self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Closed => 3,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When and how often to reconnect after an unrequested close
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub backoff: BackoffConfig,
    /// Consecutive failed attempts before giving up (0 = never)
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_attempts: 0,
        }
    }
}

/// Everything a session needs besides the token
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub endpoint: EndpointConfig,
    pub ping_interval: Duration,
    pub idle_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    /// `None` disables reconnection
    pub reconnect: Option<ReconnectPolicy>,
    pub channel_buffer: usize,
    /// Desktop notification title used when a message carries none
    pub default_title: String,
}

impl ConnectionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let reconnect = settings.reconnect.enabled.then(|| ReconnectPolicy {
            backoff: settings.reconnect.backoff(),
            max_attempts: settings.reconnect.max_attempts,
        });

        Self {
            endpoint: settings.endpoint.clone(),
            ping_interval: settings.keepalive.ping_period(),
            idle_timeout: settings.keepalive.idle_timeout(),
            connect_timeout: settings.reconnect.connect_timeout(),
            reconnect,
            channel_buffer: settings.channel_buffer.max(1),
            default_title: settings.notification.default_title.clone(),
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Consumer of decoded messages
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: InboundMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(InboundMessage) + Send + Sync + 'static,
{
    fn on_message(&self, message: InboundMessage) {
        self(message)
    }
}

/// Messages of one session, in the order the transport delivered them.
///
/// Keep-alive acknowledgements and malformed frames never appear here. The
/// stream ends when the session ends; dropping it ends the session.
#[derive(Debug)]
pub struct MessageStream {
    inner: ReceiverStream<InboundMessage>,
}

impl MessageStream {
    pub(crate) fn new(receiver: mpsc::Receiver<InboundMessage>) -> Self {
        Self {
            inner: ReceiverStream::new(receiver),
        }
    }

    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.inner.next().await
    }

    /// Feed every message to `handler` on a dedicated task
    pub fn dispatch<H: MessageHandler>(mut self, handler: H) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = self.inner.next().await {
                handler.on_message(message);
            }
            tracing::debug!("Message stream ended");
        })
    }
}

impl Stream for MessageStream {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
