//! Driver task for one notification session.
//!
//! A session owns the socket, the keep-alive timer and the reconnect loop.
//! It runs until its shutdown signal fires, its consumer goes away, or the
//! reconnect policy gives up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

use crate::config::MAX_KEEPALIVE_SECS;
use crate::error::ClientError;
use crate::metrics::{ConnectionMetrics, DeliveryMetrics, KeepAliveMetrics};
use crate::notification::{DesktopNotification, DesktopNotifier, Permission};
use crate::telemetry::attributes;
use crate::websocket::{
    parse_frame, ClientFrame, Connector, InboundFrame, InboundMessage, Transport,
};

use super::backoff::ExponentialBackoff;
use super::types::{ConnectionOptions, ConnectionState};

/// How long a close handshake may take before the socket is dropped
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection ended
#[derive(Debug)]
enum ConnectionEnd {
    /// `Close()` was requested
    Shutdown,
    /// The message stream was dropped
    ConsumerGone,
    /// The server closed the socket
    Remote,
    /// No inbound frame within the idle timeout
    Idle,
    /// Handshake failed or timed out
    Failed,
}

impl ConnectionEnd {
    fn reason(&self) -> &'static str {
        match self {
            ConnectionEnd::Shutdown => "local",
            ConnectionEnd::ConsumerGone => "consumer_gone",
            ConnectionEnd::Remote => "remote",
            ConnectionEnd::Idle => "idle",
            ConnectionEnd::Failed => "connect_failed",
        }
    }
}

enum Dispatch {
    Continue,
    Stop(ConnectionEnd),
}

pub(super) struct Session {
    pub id: Uuid,
    pub url: String,
    pub connector: Arc<dyn Connector>,
    pub notifier: Arc<dyn DesktopNotifier>,
    pub options: ConnectionOptions,
    pub state: Arc<watch::Sender<ConnectionState>>,
    pub shutdown: watch::Receiver<bool>,
    pub messages: mpsc::Sender<InboundMessage>,
}

impl Session {
    pub async fn run(mut self) {
        let mut backoff = self
            .options
            .reconnect
            .as_ref()
            .map(|policy| ExponentialBackoff::with_config(policy.backoff.clone()));
        let mut failures: u32 = 0;

        loop {
            if !self.transition(ConnectionState::Connecting) {
                break;
            }
            ConnectionMetrics::record_attempt();

            let end = match self.connect().await {
                Ok(Some(transport)) => {
                    let (end, stable) = self.drive(transport).await;
                    if stable {
                        failures = 0;
                        if let Some(backoff) = backoff.as_mut() {
                            backoff.reset();
                        }
                    } else if matches!(end, ConnectionEnd::Remote | ConnectionEnd::Idle) {
                        failures += 1;
                        ConnectionMetrics::record_failure("unstable");
                        tracing::warn!(
                            connection_id = %self.id,
                            reason = end.reason(),
                            failures = failures,
                            "Notification channel closed before it became stable"
                        );
                    }
                    end
                }
                Ok(None) => ConnectionEnd::Shutdown,
                Err(e) => {
                    failures += 1;
                    ConnectionMetrics::record_failure(e.kind());
                    tracing::warn!(
                        connection_id = %self.id,
                        error = %e,
                        failures = failures,
                        "Failed to connect notification channel"
                    );
                    ConnectionEnd::Failed
                }
            };

            self.transition(ConnectionState::Closed);

            if matches!(end, ConnectionEnd::Shutdown | ConnectionEnd::ConsumerGone)
                || self.messages.is_closed()
            {
                break;
            }

            let (Some(policy), Some(backoff)) = (self.options.reconnect.as_ref(), backoff.as_mut())
            else {
                tracing::info!(
                    connection_id = %self.id,
                    reason = end.reason(),
                    "Reconnect disabled, notification channel stays closed"
                );
                break;
            };

            if policy.max_attempts > 0 && failures >= policy.max_attempts {
                tracing::warn!(
                    connection_id = %self.id,
                    failures = failures,
                    "Giving up on notification channel after repeated failures"
                );
                break;
            }

            let delay = backoff.next_delay();
            ConnectionMetrics::record_reconnect();
            let attempt = attributes::reconnect_attempt(backoff.attempt());
            tracing::Span::current().set_attribute(attempt.key, attempt.value);
            tracing::info!(
                connection_id = %self.id,
                reason = end.reason(),
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting notification channel"
            );

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                _ = sleep(delay) => {}
            }
        }

        self.transition(ConnectionState::Closed);
        tracing::debug!(connection_id = %self.id, "Notification session ended");
    }

    /// Handshake, abandoned on shutdown (`Ok(None)`) or after the connect
    /// timeout.
    async fn connect(&mut self) -> Result<Option<Box<dyn Transport>>, ClientError> {
        let connector = self.connector.clone();
        let url = self.url.clone();
        let connect_timeout = self.options.connect_timeout;

        let attempt = async move {
            match connect_timeout {
                Some(limit) => timeout(limit, connector.connect(&url))
                    .await
                    .map_err(|_| ClientError::ConnectTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    })?,
                None => connector.connect(&url).await,
            }
        };

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => Ok(None),
            result = attempt => result.map(Some),
        }
    }

    /// Pump one open connection until it ends.
    ///
    /// The flag is set once the connection proved stable: a frame arrived
    /// or a keep-alive period passed while open.
    async fn drive(&mut self, mut transport: Box<dyn Transport>) -> (ConnectionEnd, bool) {
        if !self.transition(ConnectionState::Open) {
            self.close_transport(&mut transport).await;
            return (ConnectionEnd::Shutdown, false);
        }
        ConnectionMetrics::record_opened();
        tracing::info!(
            connection_id = %self.id,
            endpoint = %self.options.endpoint.base_url(),
            "Notification channel connected"
        );

        let period = clamp_keepalive(self.options.ping_interval);
        let opened_at = Instant::now();
        let first_ping = opened_at.checked_add(period).unwrap_or(opened_at);
        let mut keepalive = interval_at(first_ping, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let idle_timeout = self.options.idle_timeout.map(clamp_keepalive);
        let mut last_activity = opened_at;
        let mut stable = false;

        let end = loop {
            let idle_deadline = idle_timeout.and_then(|limit| last_activity.checked_add(limit));

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break ConnectionEnd::Shutdown,
                frame = transport.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        last_activity = Instant::now();
                        stable = true;
                        if let Dispatch::Stop(end) = self.dispatch(frame).await {
                            break end;
                        }
                    }
                    Some(Err(e)) => {
                        ConnectionMetrics::record_transport_error();
                        tracing::warn!(
                            connection_id = %self.id,
                            error = %e,
                            "WebSocket transport error"
                        );
                    }
                    None => break ConnectionEnd::Remote,
                },
                _ = keepalive.tick() => {
                    stable = true;
                    self.send_ping(&mut transport).await;
                }
                _ = idle_elapsed(idle_deadline) => {
                    tracing::warn!(
                        connection_id = %self.id,
                        idle_timeout_secs = idle_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                        "No inbound frames within idle timeout"
                    );
                    break ConnectionEnd::Idle;
                }
            }
        };

        self.close_transport(&mut transport).await;
        ConnectionMetrics::record_closed(end.reason());
        tracing::info!(
            connection_id = %self.id,
            reason = end.reason(),
            "Notification channel closed"
        );

        (end, stable)
    }

    /// Close handshake, bounded by `CLOSE_TIMEOUT`
    async fn close_transport(&self, transport: &mut Box<dyn Transport>) {
        match timeout(CLOSE_TIMEOUT, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, error = %e, "Error while closing socket");
            }
            Err(_) => {
                ConnectionMetrics::record_transport_error();
                tracing::warn!(
                    connection_id = %self.id,
                    timeout_secs = CLOSE_TIMEOUT.as_secs(),
                    "Close handshake timed out, dropping socket"
                );
            }
        }
    }

    /// Decode one frame and hand it to the consumer.
    ///
    /// Malformed frames and keep-alive acknowledgements are consumed here.
    async fn dispatch(&mut self, frame: InboundFrame) -> Dispatch {
        let message = match parse_frame(&frame) {
            Ok(message) => message,
            Err(e) => {
                DeliveryMetrics::record_malformed();
                tracing::warn!(
                    connection_id = %self.id,
                    error = %e,
                    "Invalid notification message"
                );
                return Dispatch::Continue;
            }
        };

        if message.is_keepalive_ack() {
            DeliveryMetrics::record_pong();
            tracing::trace!(connection_id = %self.id, "Keep-alive acknowledged");
            return Dispatch::Continue;
        }

        DeliveryMetrics::record_notification();
        tracing::debug!(
            connection_id = %self.id,
            message_type = message.kind().unwrap_or_default(),
            "Notification received"
        );

        let notification = (self.notifier.permission() == Permission::Granted)
            .then(|| DesktopNotification::from_message(&message, &self.options.default_title));

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => {
                return Dispatch::Stop(ConnectionEnd::Shutdown);
            }
            sent = self.messages.send(message) => {
                if sent.is_err() {
                    tracing::debug!(connection_id = %self.id, "Message consumer went away");
                    return Dispatch::Stop(ConnectionEnd::ConsumerGone);
                }
            }
        }

        if let Some(notification) = notification {
            self.notifier.show(&notification);
            DeliveryMetrics::record_desktop_notification();
        }

        Dispatch::Continue
    }

    /// Keep-alive tick: ping only while the connection is open
    async fn send_ping(&self, transport: &mut Box<dyn Transport>) {
        if *self.state.borrow() != ConnectionState::Open {
            KeepAliveMetrics::record_ping_skipped();
            return;
        }

        let text = match ClientFrame::Ping.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize ping");
                return;
            }
        };

        match transport.send_text(text).await {
            Ok(()) => {
                KeepAliveMetrics::record_ping_sent();
                tracing::trace!(connection_id = %self.id, "Keep-alive ping sent");
            }
            Err(e) => {
                ConnectionMetrics::record_transport_error();
                tracing::warn!(
                    connection_id = %self.id,
                    error = %e,
                    "Failed to send keep-alive ping"
                );
            }
        }
    }

    /// Publish a state change unless this session has been shut down.
    ///
    /// Returns false once shutdown was requested, so a stale session can
    /// never overwrite the state of its successor.
    fn transition(&self, next: ConnectionState) -> bool {
        let shutdown = &self.shutdown;
        let mut allowed = false;
        let changed = self.state.send_if_modified(|current| {
            if *shutdown.borrow() {
                return false;
            }
            allowed = true;
            if *current == next {
                return false;
            }
            *current = next;
            true
        });

        if changed {
            ConnectionMetrics::set_state(next.metric_code());
            tracing::debug!(connection_id = %self.id, state = %next, "Connection state changed");
        }
        allowed
    }
}

/// Resolves once shutdown is signalled or the manager is gone
pub(super) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn clamp_keepalive(period: Duration) -> Duration {
    period.clamp(Duration::from_millis(1), Duration::from_secs(MAX_KEEPALIVE_SECS))
}

async fn idle_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
