//! End-to-end notification flow over the in-memory transport
//!
//! Wires a file token store, the refetch broadcaster and a recording
//! notifier into a bridge, then plays the server side by hand.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

use meridian_notification_client::config::Settings;
use meridian_notification_client::connection_manager::{
    ConnectionManager, ConnectionOptions, ConnectionState,
};
use meridian_notification_client::notification::{
    MemoryNotifier, MountOutcome, NotificationBridge, Permission, PermissionGate,
};
use meridian_notification_client::refetch::{RefetchBroadcaster, RefetchRequest};
use meridian_notification_client::token::FileTokenStore;
use meridian_notification_client::websocket::{ClientEvent, MemoryConnector, MemoryServer};
use meridian_notification_client::ClientError;

struct TestEnvironment {
    _dir: TempDir,
    store_path: std::path::PathBuf,
    bridge: NotificationBridge,
    server: MemoryServer,
    connector: Arc<MemoryConnector>,
    notifier: Arc<MemoryNotifier>,
    quotes: Arc<RefetchBroadcaster>,
    refetches: broadcast::Receiver<RefetchRequest>,
}

fn create_test_environment(permission: Permission) -> TestEnvironment {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("storage.json");

    let mut settings = Settings::default();
    settings.token.store_path = store_path.clone();
    settings.reconnect.jitter_factor = 0.0;

    let (connector, server) = MemoryConnector::new();
    let connector = Arc::new(connector);
    let notifier = Arc::new(MemoryNotifier::new(permission));
    let quotes = Arc::new(RefetchBroadcaster::new(settings.quotes.status.clone(), 16));
    let refetches = quotes.subscribe();

    let bridge = NotificationBridge::new(
        &settings,
        connector.clone(),
        Arc::new(FileTokenStore::new(store_path.clone())),
        quotes.clone(),
        notifier.clone(),
    )
    .with_permission_gate(Arc::new(PermissionGate::new()));

    TestEnvironment {
        _dir: dir,
        store_path,
        bridge,
        server,
        connector,
        notifier,
        quotes,
        refetches,
    }
}

fn write_token(env: &TestEnvironment, token: Option<&str>) {
    let contents = match token {
        Some(token) => json!({ "ACS_TKN": token, "theme": "light" }),
        None => json!({ "theme": "light" }),
    };
    std::fs::write(&env.store_path, contents.to_string()).unwrap();
}

async fn next_refetch(refetches: &mut broadcast::Receiver<RefetchRequest>) -> RefetchRequest {
    tokio::time::timeout(Duration::from_secs(5), refetches.recv())
        .await
        .expect("no refetch requested")
        .expect("refetch channel closed")
}

#[tokio::test]
async fn test_quote_update_refreshes_quotes_and_notifies() {
    let mut env = create_test_environment(Permission::Default);
    write_token(&env, Some("abc123"));

    assert_eq!(env.bridge.mount(), MountOutcome::Connected);
    assert_eq!(env.notifier.request_count(), 1);

    let peer = env.server.accept().await.unwrap();
    assert_eq!(
        peer.url(),
        "wss://dev.meridian.ociuzerp.in/ws/notifications/?token=abc123"
    );

    peer.send_json(&json!({"type": "pong"}));
    peer.send_json(&json!({
        "type": "quote_update",
        "title": "Quote Ready",
        "message": "Your quote QT-1 is ready",
        "quote_id": "QT-1"
    }));

    let request = next_refetch(&mut env.refetches).await;
    assert_eq!(request.status, "SE");
    assert_eq!(request.sequence, 1);
    assert_eq!(env.quotes.request_count(), 1);

    let shown = env.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "Quote Ready");
    assert_eq!(shown[0].body.as_deref(), Some("Your quote QT-1 is ready"));

    env.bridge.shutdown().await;
    assert!(env.refetches.try_recv().is_err());
}

#[tokio::test]
async fn test_no_token_means_no_socket() {
    let mut env = create_test_environment(Permission::Granted);

    assert_eq!(env.bridge.mount(), MountOutcome::NoToken);
    write_token(&env, None);
    assert_eq!(env.bridge.mount(), MountOutcome::NoToken);
    write_token(&env, Some(""));
    assert_eq!(env.bridge.mount(), MountOutcome::NoToken);

    tokio::task::yield_now().await;
    assert_eq!(env.connector.attempts(), 0);
    assert!(env.server.try_accept().is_none());
    assert_eq!(env.quotes.request_count(), 0);
}

#[tokio::test]
async fn test_login_logout_cycle() {
    let mut env = create_test_environment(Permission::Denied);

    assert_eq!(env.bridge.mount(), MountOutcome::NoToken);

    write_token(&env, Some("first"));
    assert_eq!(env.bridge.mount(), MountOutcome::Connected);
    let mut first = env.server.accept().await.unwrap();
    assert_eq!(env.bridge.mount(), MountOutcome::Unchanged);

    write_token(&env, Some("second"));
    assert_eq!(env.bridge.mount(), MountOutcome::Connected);
    let second = env.server.accept().await.unwrap();
    assert!(second.url().ends_with("?token=second"));
    assert_eq!(first.recv().await, Some(ClientEvent::Closed));

    second.send_json(&json!({"type": "booking_update"}));
    next_refetch(&mut env.refetches).await;
    assert!(env.notifier.shown().is_empty());

    write_token(&env, None);
    assert_eq!(env.bridge.mount(), MountOutcome::NoToken);
    assert_eq!(env.bridge.connection_state(), ConnectionState::Closed);
    assert_eq!(env.connector.urls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bridge_reconnects_after_server_restart() {
    let mut env = create_test_environment(Permission::Granted);
    write_token(&env, Some("abc123"));

    env.bridge.mount();
    let mut peer = env.server.accept().await.unwrap();
    peer.close();
    drop(peer);

    let peer = env.server.accept().await.unwrap();
    assert_eq!(env.connector.attempts(), 2);
    assert_eq!(env.bridge.mount(), MountOutcome::Unchanged);

    peer.send_json(&json!({"type": "quote_update"}));
    next_refetch(&mut env.refetches).await;
    assert_eq!(env.notifier.shown()[0].title, "New Update");
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_runs_only_while_open() {
    let (connector, mut server) = MemoryConnector::new();
    let notifier = Arc::new(MemoryNotifier::new(Permission::Default));
    let mut manager = ConnectionManager::new(
        ConnectionOptions::default(),
        Arc::new(connector),
        notifier,
    );

    assert_err!(manager.open(None));
    let mut stream = assert_ok!(manager.open(Some("abc123")));
    let mut peer = server.accept().await.unwrap();

    tokio::time::sleep(Duration::from_millis(30_500)).await;
    assert_eq!(
        peer.try_recv(),
        Some(ClientEvent::Text(r#"{"type":"ping"}"#.to_string()))
    );

    manager.close();
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(peer.try_recv(), Some(ClientEvent::Closed));
    assert_eq!(peer.try_recv(), None);
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_missing_token_error_kind() {
    let (connector, _server) = MemoryConnector::new();
    let mut manager = ConnectionManager::new(
        ConnectionOptions::default(),
        Arc::new(connector),
        Arc::new(MemoryNotifier::new(Permission::Default)),
    );

    let err = manager.open(Some("")).err().unwrap();
    assert!(matches!(err, ClientError::MissingToken));
    assert_eq!(err.kind(), "missing_token");
    assert_eq!(manager.state(), ConnectionState::Idle);
}
