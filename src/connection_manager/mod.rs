//! Connection manager for the notification channel.
//!
//! Owns at most one live session bound to a session token. Each `open`
//! spawns a driver task (see `session`) and returns the session's message
//! stream; `close` signals the task and returns immediately.

mod backoff;
mod endpoint;
mod session;
mod types;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use endpoint::notification_url;
pub use types::{
    ConnectionOptions, ConnectionState, MessageHandler, MessageStream, ReconnectPolicy,
};

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::error::ClientError;
use crate::metrics::ConnectionMetrics;
use crate::notification::DesktopNotifier;
use crate::telemetry::attributes;
use crate::websocket::Connector;

use session::Session;

struct ActiveSession {
    id: Uuid,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Manages the single notification connection of one bridge.
///
/// Must be used from within a tokio runtime. Dropping the manager closes
/// the connection.
pub struct ConnectionManager {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn DesktopNotifier>,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Option<ActiveSession>,
    /// Closed sessions still finishing their close handshake
    draining: Vec<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn DesktopNotifier>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            options,
            connector,
            notifier,
            state: Arc::new(state),
            session: None,
            draining: Vec::new(),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Whether a session task is currently running
    pub fn is_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
    }

    /// Open a session bound to `token` and return its message stream.
    ///
    /// A missing or empty token is a no-op reported as `MissingToken`. Any
    /// previous session is closed first.
    pub fn open(&mut self, token: Option<&str>) -> Result<MessageStream, ClientError> {
        let token = match token {
            Some(token) if !token.is_empty() => token,
            _ => {
                tracing::debug!("No session token, notification channel not opened");
                return Err(ClientError::MissingToken);
            }
        };

        self.close();

        let id = Uuid::new_v4();
        let (messages_tx, messages_rx) = mpsc::channel(self.options.channel_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.state.send_replace(ConnectionState::Connecting);
        ConnectionMetrics::set_state(ConnectionState::Connecting.metric_code());

        let session = Session {
            id,
            url: notification_url(&self.options.endpoint, token),
            connector: self.connector.clone(),
            notifier: self.notifier.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            shutdown: shutdown_rx,
            messages: messages_tx,
        };

        tracing::info!(
            connection_id = %id,
            endpoint = %self.options.endpoint.base_url(),
            "Opening notification channel"
        );

        let span = tracing::info_span!("notification_session", connection_id = %id);
        let attribute = attributes::connection_id(id);
        span.set_attribute(attribute.key, attribute.value);

        let task = tokio::spawn(session.run().instrument(span));
        self.session = Some(ActiveSession {
            id,
            shutdown: shutdown_tx,
            task,
        });

        Ok(MessageStream::new(messages_rx))
    }

    /// Open a session and feed its messages to `handler` in order
    pub fn open_with_handler<H: MessageHandler>(
        &mut self,
        token: Option<&str>,
        handler: H,
    ) -> Result<JoinHandle<()>, ClientError> {
        let stream = self.open(token)?;
        Ok(stream.dispatch(handler))
    }

    /// Tear down the current session.
    ///
    /// Keep-alive stops immediately and socket closure is requested. Safe to
    /// call in any state, any number of times.
    pub fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let _ = session.shutdown.send(true);
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closed;
            true
        });
        if changed {
            ConnectionMetrics::set_state(ConnectionState::Closed.metric_code());
        }

        tracing::info!(connection_id = %session.id, "Closing notification channel");

        self.draining.retain(|task| !task.is_finished());
        self.draining.push(session.task);
    }

    /// Close and wait until every session task has finished
    pub async fn shutdown(&mut self) {
        self.close();
        for task in self.draining.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Notification session task failed");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}
