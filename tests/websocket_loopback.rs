//! Connection manager against a real WebSocket server on loopback

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use meridian_notification_client::config::EndpointConfig;
use meridian_notification_client::connection_manager::{
    ConnectionManager, ConnectionOptions, ConnectionState, MessageStream,
};
use meridian_notification_client::notification::{MemoryNotifier, Permission};
use meridian_notification_client::websocket::WsConnector;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_listener() -> (TcpListener, EndpointConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = EndpointConfig {
        scheme: "ws".to_string(),
        host: addr.to_string(),
        path: "/ws/notifications/".to_string(),
    };
    (listener, endpoint)
}

/// Accept one client and return the socket with the requested URI
async fn accept_one(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (tcp, _) = tokio::time::timeout(TIMEOUT, listener.accept())
        .await
        .expect("no client connected")
        .unwrap();

    let mut uri = String::new();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        uri = request.uri().to_string();
        Ok(response)
    };
    let ws = accept_hdr_async(tcp, callback).await.unwrap();

    (ws, uri)
}

fn create_manager(endpoint: EndpointConfig, ping_interval: Duration) -> ConnectionManager {
    let options = ConnectionOptions {
        endpoint,
        ping_interval,
        reconnect: None,
        ..ConnectionOptions::default()
    };
    ConnectionManager::new(
        options,
        Arc::new(WsConnector::new()),
        Arc::new(MemoryNotifier::new(Permission::Denied)),
    )
}

async fn next_message(stream: &mut MessageStream) -> Option<serde_json::Value> {
    tokio::time::timeout(TIMEOUT, stream.recv())
        .await
        .expect("timed out waiting for message")
        .map(|message| serde_json::Value::Object(message.into_fields()))
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    loop {
        let frame = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for client frame")?;
        match frame {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

#[tokio::test]
async fn test_token_in_query_and_delivery() {
    let (listener, endpoint) = start_listener().await;
    let mut manager = create_manager(endpoint, Duration::from_secs(30));

    let mut stream = manager.open(Some("a b+c")).unwrap();
    let (mut ws, uri) = accept_one(&listener).await;
    assert_eq!(uri, "/ws/notifications/?token=a%20b%2Bc");

    ws.send(Message::text(json!({"type": "pong"}).to_string())).await.unwrap();
    ws.send(Message::text("{broken")).await.unwrap();
    ws.send(Message::text(
        json!({"type": "quote_update", "title": "Quote Ready", "quote_id": "QT-1"}).to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::binary(br#"{"type":"booking_update"}"#.to_vec()))
        .await
        .unwrap();

    let first = next_message(&mut stream).await.unwrap();
    assert_eq!(first["type"], "quote_update");
    assert_eq!(first["quote_id"], "QT-1");

    let second = next_message(&mut stream).await.unwrap();
    assert_eq!(second["type"], "booking_update");
    assert_eq!(manager.state(), ConnectionState::Open);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_ping_reaches_server() {
    let (listener, endpoint) = start_listener().await;
    let mut manager = create_manager(endpoint, Duration::from_millis(200));

    let _stream = manager.open(Some("abc123")).unwrap();
    let (mut ws, _) = accept_one(&listener).await;

    let ping = next_text(&mut ws).await.unwrap();
    assert_eq!(ping, r#"{"type":"ping"}"#);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_close_sends_close_frame() {
    let (listener, endpoint) = start_listener().await;
    let mut manager = create_manager(endpoint, Duration::from_secs(30));

    let mut stream = manager.open(Some("abc123")).unwrap();
    let (mut ws, _) = accept_one(&listener).await;

    manager.close();
    manager.close();
    assert_eq!(manager.state(), ConnectionState::Closed);

    assert_eq!(next_text(&mut ws).await, None);
    assert!(next_message(&mut stream).await.is_none());

    manager.shutdown().await;
    assert!(!manager.is_active());
}

#[tokio::test]
async fn test_server_close_ends_stream_without_reconnect() {
    let (listener, endpoint) = start_listener().await;
    let mut manager = create_manager(endpoint, Duration::from_secs(30));

    let mut stream = manager.open(Some("abc123")).unwrap();
    let (mut ws, _) = accept_one(&listener).await;

    ws.close(None).await.unwrap();

    assert!(next_message(&mut stream).await.is_none());
    assert_eq!(manager.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_connection_refused_is_not_fatal() {
    let (listener, endpoint) = start_listener().await;
    drop(listener);

    let mut manager = create_manager(endpoint, Duration::from_secs(30));
    let mut stream = manager.open(Some("abc123")).unwrap();

    assert!(next_message(&mut stream).await.is_none());
    assert_eq!(manager.state(), ConnectionState::Closed);
}
