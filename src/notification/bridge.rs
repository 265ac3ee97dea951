//! Glue between the token store, the connection manager and the quotes
//! cache.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::connection_manager::{
    ConnectionManager, ConnectionOptions, ConnectionState, MessageHandler,
};
use crate::error::ClientError;
use crate::metrics::DeliveryMetrics;
use crate::refetch::QuotesCache;
use crate::token::TokenStore;
use crate::websocket::{Connector, InboundMessage};

use super::desktop::DesktopNotifier;
use super::permission::PermissionGate;

/// Result of a `mount`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// A session was opened with the current token
    Connected,
    /// The session for the current token is already live
    Unchanged,
    /// No token in the store; nothing is connected
    NoToken,
}

/// Refreshes the quotes cache on every message
#[derive(Clone)]
pub struct BridgeHandler {
    quotes: Arc<dyn QuotesCache>,
}

impl MessageHandler for BridgeHandler {
    fn on_message(&self, message: InboundMessage) {
        tracing::debug!(
            message_type = message.kind().unwrap_or_default(),
            "Notification received, refreshing quotes"
        );
        DeliveryMetrics::record_refetch();
        self.quotes.refetch();
    }
}

/// Activation boundary of the notification channel.
///
/// `mount` reads the token and (re)opens the connection; `unmount` tears it
/// down. Dropping the bridge unmounts it.
pub struct NotificationBridge {
    token_key: String,
    token_store: Arc<dyn TokenStore>,
    quotes: Arc<dyn QuotesCache>,
    notifier: Arc<dyn DesktopNotifier>,
    permission_gate: Arc<PermissionGate>,
    manager: ConnectionManager,
    current_token: Option<String>,
    dispatcher: Option<JoinHandle<()>>,
}

impl NotificationBridge {
    pub fn new(
        settings: &Settings,
        connector: Arc<dyn Connector>,
        token_store: Arc<dyn TokenStore>,
        quotes: Arc<dyn QuotesCache>,
        notifier: Arc<dyn DesktopNotifier>,
    ) -> Self {
        let options = ConnectionOptions::from_settings(settings);
        let manager = ConnectionManager::new(options, connector, notifier.clone());

        Self {
            token_key: settings.token.key.clone(),
            token_store,
            quotes,
            notifier,
            permission_gate: PermissionGate::global(),
            manager,
            current_token: None,
            dispatcher: None,
        }
    }

    /// Use `gate` instead of the process-wide permission gate
    pub fn with_permission_gate(mut self, gate: Arc<PermissionGate>) -> Self {
        self.permission_gate = gate;
        self
    }

    /// Activate the bridge.
    ///
    /// Reads the token once, asks for notification permission if it was never
    /// asked for, and makes sure the live session matches the token.
    pub fn mount(&mut self) -> MountOutcome {
        let token = self.token_store.get(&self.token_key);

        self.permission_gate.request_once(self.notifier.as_ref());

        let Some(token) = token else {
            if self.current_token.is_some() {
                tracing::info!("Session token removed, closing notification channel");
            }
            self.unmount();
            return MountOutcome::NoToken;
        };

        if self.current_token.as_deref() == Some(token.as_str()) && self.manager.is_active() {
            return MountOutcome::Unchanged;
        }

        if self.current_token.is_some() {
            tracing::info!("Session token changed, reopening notification channel");
        }
        self.unmount();

        let handler = self.message_handler();
        match self.manager.open_with_handler(Some(&token), handler) {
            Ok(dispatcher) => {
                tracing::debug!(
                    endpoint = %self.manager.options().endpoint.base_url(),
                    "Notification bridge opened session"
                );
                self.dispatcher = Some(dispatcher);
                self.current_token = Some(token);
                MountOutcome::Connected
            }
            Err(ClientError::MissingToken) => MountOutcome::NoToken,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open notification channel");
                MountOutcome::NoToken
            }
        }
    }

    /// Deactivate the bridge: close the connection and stop dispatching
    pub fn unmount(&mut self) {
        self.manager.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        self.current_token = None;
    }

    /// Unmount and wait for the session to finish closing
    pub async fn shutdown(&mut self) {
        self.unmount();
        self.manager.shutdown().await;
    }

    /// Handler fed with every message of the live session
    pub fn message_handler(&self) -> BridgeHandler {
        BridgeHandler {
            quotes: self.quotes.clone(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    pub fn is_mounted(&self) -> bool {
        self.current_token.is_some()
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.unmount();
    }
}
