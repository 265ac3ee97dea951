//! OS-level notification surface.
//!
//! `DesktopNotifier` is the seam to whatever shows notifications on the
//! host. `SystemNotifier` hands them to the OS notification service via
//! notify-rust, `TerminalNotifier` prints them and `MemoryNotifier` records
//! them.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::NotificationConfig;
use crate::websocket::InboundMessage;

use super::permission::{Permission, PermissionCell};

/// A notification to be shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesktopNotification {
    pub title: String,
    pub body: Option<String>,
}

impl DesktopNotification {
    /// Build from a message's `title` and `message`, falling back to
    /// `default_title` when the title is missing or empty
    pub fn from_message(message: &InboundMessage, default_title: &str) -> Self {
        let title = message
            .title()
            .filter(|title| !title.is_empty())
            .unwrap_or(default_title);

        Self {
            title: title.to_string(),
            body: message.message().map(str::to_string),
        }
    }
}

pub trait DesktopNotifier: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> Permission;

    /// Prompt for permission and return the decision
    fn request_permission(&self) -> Permission;

    fn show(&self, notification: &DesktopNotification);
}

/// Notifier for the host notification service (D-Bus on Linux, the
/// notification center on macOS, toasts on Windows).
///
/// Delivery runs on the blocking pool. When the service rejects a
/// notification it is written to the terminal instead.
#[derive(Debug)]
pub struct SystemNotifier {
    app_name: String,
    grant_on_request: bool,
    permission: PermissionCell,
    fallback: Arc<TerminalNotifier>,
    unavailable: Arc<AtomicBool>,
}

impl SystemNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            app_name: config.app_name.clone(),
            grant_on_request: config.grant_on_request,
            permission: PermissionCell::new(config.permission),
            fallback: Arc::new(TerminalNotifier::new(config)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Native notification for `notification`
    pub fn build(&self, notification: &DesktopNotification) -> notify_rust::Notification {
        let mut native = notify_rust::Notification::new();
        native.appname(&self.app_name).summary(&notification.title);
        if let Some(body) = &notification.body {
            native.body(body);
        }
        native
    }

    /// Whether the notification service has rejected a notification
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Relaxed)
    }
}

impl DesktopNotifier for SystemNotifier {
    fn permission(&self) -> Permission {
        self.permission.get()
    }

    fn request_permission(&self) -> Permission {
        let decision = if self.grant_on_request {
            Permission::Granted
        } else {
            Permission::Denied
        };
        self.permission.set(decision);
        decision
    }

    fn show(&self, notification: &DesktopNotification) {
        let native = self.build(notification);
        let notification = notification.clone();
        let fallback = self.fallback.clone();
        let unavailable = self.unavailable.clone();

        let deliver = move || match native.show() {
            Ok(_) => {
                tracing::debug!(title = %notification.title, "Desktop notification shown");
            }
            Err(e) => {
                if !unavailable.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        error = %e,
                        "Notification service unavailable, writing to terminal instead"
                    );
                }
                fallback.show(&notification);
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(deliver);
            }
            Err(_) => deliver(),
        }
    }
}

/// Notifier used by the binary: the host notification service when
/// notifications are enabled, otherwise a terminal notifier reporting no
/// support
pub fn create_notifier(config: &NotificationConfig) -> Arc<dyn DesktopNotifier> {
    if config.enabled {
        Arc::new(SystemNotifier::new(config))
    } else {
        Arc::new(TerminalNotifier::new(config))
    }
}

/// Notifier that writes to the controlling terminal
#[derive(Debug)]
pub struct TerminalNotifier {
    enabled: bool,
    grant_on_request: bool,
    permission: PermissionCell,
}

impl TerminalNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            grant_on_request: config.grant_on_request,
            permission: PermissionCell::new(config.permission),
        }
    }
}

impl DesktopNotifier for TerminalNotifier {
    fn is_supported(&self) -> bool {
        self.enabled
    }

    fn permission(&self) -> Permission {
        if !self.enabled {
            return Permission::Denied;
        }
        self.permission.get()
    }

    fn request_permission(&self) -> Permission {
        let decision = if self.grant_on_request {
            Permission::Granted
        } else {
            Permission::Denied
        };
        self.permission.set(decision);
        decision
    }

    fn show(&self, notification: &DesktopNotification) {
        tracing::info!(
            title = %notification.title,
            body = notification.body.as_deref().unwrap_or_default(),
            "Desktop notification"
        );

        let mut stdout = std::io::stdout().lock();
        let result = match &notification.body {
            Some(body) => writeln!(stdout, "\x07[{}] {}", notification.title, body),
            None => writeln!(stdout, "\x07[{}]", notification.title),
        };
        if let Err(e) = result.and_then(|_| stdout.flush()) {
            tracing::warn!(error = %e, "Failed to write desktop notification");
        }
    }
}

/// Notifier that records what it was asked to show
#[derive(Debug)]
pub struct MemoryNotifier {
    supported: bool,
    grant_on_request: AtomicBool,
    permission: PermissionCell,
    requests: AtomicUsize,
    shown: Mutex<Vec<DesktopNotification>>,
}

impl MemoryNotifier {
    pub fn new(permission: Permission) -> Self {
        Self {
            supported: true,
            grant_on_request: AtomicBool::new(true),
            permission: PermissionCell::new(permission),
            requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        }
    }

    /// A notifier on a host without notification support
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Permission::Default)
        }
    }

    pub fn set_permission(&self, permission: Permission) {
        self.permission.set(permission);
    }

    /// Decision returned by the next permission prompts
    pub fn set_grant_on_request(&self, grant: bool) {
        self.grant_on_request.store(grant, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn shown(&self) -> Vec<DesktopNotification> {
        self.shown
            .lock()
            .map(|shown| shown.clone())
            .unwrap_or_default()
    }
}

impl DesktopNotifier for MemoryNotifier {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn permission(&self) -> Permission {
        self.permission.get()
    }

    fn request_permission(&self) -> Permission {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let decision = if self.grant_on_request.load(Ordering::SeqCst) {
            Permission::Granted
        } else {
            Permission::Denied
        };
        self.permission.set(decision);
        decision
    }

    fn show(&self, notification: &DesktopNotification) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(notification.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> InboundMessage {
        match value {
            serde_json::Value::Object(fields) => InboundMessage::new(fields),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_notification_from_message() {
        let notification = DesktopNotification::from_message(
            &message(json!({
                "type": "quote_update",
                "title": "Quote Ready",
                "message": "Your quote QT-1 is ready"
            })),
            "New Update",
        );
        assert_eq!(notification.title, "Quote Ready");
        assert_eq!(notification.body.as_deref(), Some("Your quote QT-1 is ready"));
    }

    #[test]
    fn test_default_title() {
        let missing =
            DesktopNotification::from_message(&message(json!({"type": "x"})), "New Update");
        assert_eq!(missing.title, "New Update");
        assert_eq!(missing.body, None);

        let empty = DesktopNotification::from_message(
            &message(json!({"type": "x", "title": ""})),
            "New Update",
        );
        assert_eq!(empty.title, "New Update");
    }

    #[test]
    fn test_terminal_notifier_permission() {
        let mut config = NotificationConfig::default();
        let notifier = TerminalNotifier::new(&config);
        assert!(notifier.is_supported());
        assert_eq!(notifier.permission(), Permission::Default);
        assert_eq!(notifier.request_permission(), Permission::Granted);
        assert_eq!(notifier.permission(), Permission::Granted);

        config.enabled = false;
        config.permission = Permission::Granted;
        let disabled = TerminalNotifier::new(&config);
        assert!(!disabled.is_supported());
        assert_eq!(disabled.permission(), Permission::Denied);
    }

    #[test]
    fn test_system_notifier_builds_native_notification() {
        let notifier = SystemNotifier::new(&NotificationConfig::default());

        let native = notifier.build(&DesktopNotification {
            title: "Quote Ready".to_string(),
            body: Some("Your quote QT-1 is ready".to_string()),
        });
        assert_eq!(native.appname, "Meridian");
        assert_eq!(native.summary, "Quote Ready");
        assert_eq!(native.body, "Your quote QT-1 is ready");

        let untitled = notifier.build(&DesktopNotification {
            title: "New Update".to_string(),
            body: None,
        });
        assert_eq!(untitled.summary, "New Update");
        assert!(untitled.body.is_empty());
        assert!(!notifier.is_unavailable());
    }

    #[test]
    fn test_system_notifier_permission() {
        let mut config = NotificationConfig::default();
        config.grant_on_request = false;
        let notifier = SystemNotifier::new(&config);

        assert!(notifier.is_supported());
        assert_eq!(notifier.permission(), Permission::Default);
        assert_eq!(notifier.request_permission(), Permission::Denied);
        assert_eq!(notifier.permission(), Permission::Denied);
    }

    #[test]
    fn test_create_notifier_follows_config() {
        let mut config = NotificationConfig::default();
        config.permission = Permission::Granted;

        let enabled = create_notifier(&config);
        assert!(enabled.is_supported());
        assert_eq!(enabled.permission(), Permission::Granted);

        config.enabled = false;
        let disabled = create_notifier(&config);
        assert!(!disabled.is_supported());
        assert_eq!(disabled.permission(), Permission::Denied);
    }

    #[test]
    fn test_memory_notifier_records() {
        let notifier = MemoryNotifier::new(Permission::Granted);
        notifier.show(&DesktopNotification {
            title: "A".to_string(),
            body: None,
        });
        assert_eq!(notifier.shown().len(), 1);
        assert_eq!(notifier.request_count(), 0);
    }
}
