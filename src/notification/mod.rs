//! Notification bridge and desktop notification support.
//!
//! `NotificationBridge` is what the host application activates: it owns the
//! connection manager, turns every delivered message into a quotes refetch,
//! and makes sure the desktop permission prompt runs at most once.

mod bridge;
mod desktop;
mod permission;

pub use bridge::{BridgeHandler, MountOutcome, NotificationBridge};
pub use desktop::{
    create_notifier, DesktopNotification, DesktopNotifier, MemoryNotifier, SystemNotifier,
    TerminalNotifier,
};
pub use permission::{Permission, PermissionCell, PermissionGate};
