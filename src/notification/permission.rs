use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use super::desktop::DesktopNotifier;

/// Desktop notification permission, as reported by the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Not asked yet
    #[default]
    Default,
    Granted,
    Denied,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Default => "default",
            Permission::Granted => "granted",
            Permission::Denied => "denied",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Permission::Default => 0,
            Permission::Granted => 1,
            Permission::Denied => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Permission::Granted,
            2 => Permission::Denied,
            _ => Permission::Default,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free permission slot shared between a notifier and its readers
#[derive(Debug, Default)]
pub struct PermissionCell(AtomicU8);

impl PermissionCell {
    pub fn new(permission: Permission) -> Self {
        Self(AtomicU8::new(permission.to_u8()))
    }

    pub fn get(&self) -> Permission {
        Permission::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, permission: Permission) {
        self.0.store(permission.to_u8(), Ordering::Release);
    }
}

lazy_static! {
    static ref GLOBAL_GATE: Arc<PermissionGate> = Arc::new(PermissionGate::new());
}

/// One-shot guard around the permission prompt.
///
/// The prompt is shown at most once per gate, however many times the bridge
/// is mounted. `PermissionGate::global()` is the process-wide gate.
#[derive(Debug, Default)]
pub struct PermissionGate {
    requested: AtomicBool,
}

impl PermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Arc<PermissionGate> {
        GLOBAL_GATE.clone()
    }

    /// Ask for permission if the notifier is supported and still undecided.
    ///
    /// Returns the outcome of the request, or `None` when no request was made.
    pub fn request_once(&self, notifier: &dyn DesktopNotifier) -> Option<Permission> {
        if !notifier.is_supported() || notifier.permission() != Permission::Default {
            return None;
        }
        if self.requested.swap(true, Ordering::AcqRel) {
            return None;
        }

        let outcome = notifier.request_permission();
        tracing::info!(permission = %outcome, "Desktop notification permission requested");
        Some(outcome)
    }

    pub fn has_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::MemoryNotifier;

    #[test]
    fn test_permission_parses_lowercase() {
        let permission: Permission = serde_json::from_str("\"granted\"").unwrap();
        assert_eq!(permission, Permission::Granted);
        assert_eq!(Permission::default(), Permission::Default);
        assert_eq!(Permission::Denied.to_string(), "denied");
    }

    #[test]
    fn test_cell_round_trips() {
        let cell = PermissionCell::new(Permission::Denied);
        assert_eq!(cell.get(), Permission::Denied);
        cell.set(Permission::Granted);
        assert_eq!(cell.get(), Permission::Granted);
    }

    #[test]
    fn test_request_happens_once() {
        let gate = PermissionGate::new();
        let notifier = MemoryNotifier::new(Permission::Default);
        notifier.set_grant_on_request(false);

        assert_eq!(gate.request_once(&notifier), Some(Permission::Denied));
        notifier.set_permission(Permission::Default);
        assert_eq!(gate.request_once(&notifier), None);
        assert_eq!(notifier.request_count(), 1);
        assert!(gate.has_requested());
    }

    #[test]
    fn test_no_request_when_decided() {
        let gate = PermissionGate::new();
        let notifier = MemoryNotifier::new(Permission::Granted);

        assert_eq!(gate.request_once(&notifier), None);
        assert_eq!(notifier.request_count(), 0);
        assert!(!gate.has_requested());
    }

    #[test]
    fn test_no_request_when_unsupported() {
        let gate = PermissionGate::new();
        let notifier = MemoryNotifier::unsupported();

        assert_eq!(gate.request_once(&notifier), None);
        assert!(!gate.has_requested());
    }
}
