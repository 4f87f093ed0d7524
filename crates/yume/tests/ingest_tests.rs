//! Ingestion server integration tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;
use yume::config::IngestConfig;
use yume::events::{AppEvent, BroadcastSink};
use yume::ingest::{IngestError, IngestServer};

mod common;
use common::{EVENT_TIMEOUT, expect_event, wait_until};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> IngestConfig {
    IngestConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..IngestConfig::default()
    }
}

async fn start_server() -> (Arc<IngestServer>, Arc<BroadcastSink>, SocketAddr) {
    let sink = Arc::new(BroadcastSink::new());
    let server = Arc::new(IngestServer::new(test_config(), sink.clone()));
    let addr = server.start().await.unwrap();
    (server, sink, addr)
}

async fn connect_client(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    client
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_capture_events_are_forwarded() {
    let (server, sink, addr) = start_server().await;
    let mut events = sink.subscribe();
    let mut client = connect_client(addr, "/ws/transcription").await;

    let connected = expect_event(&mut events, "agent connected", |e| {
        matches!(e, AppEvent::CaptureClientConnected { .. })
    })
    .await;
    assert_eq!(connected.name(), "transcriptionExtensionConnected");
    assert_eq!(connected.payload()["clients"], 1);

    send_json(
        &mut client,
        json!({
            "type": "new_message",
            "text": "Good morning",
            "speaker": "Alice",
            "timestamp": "2024-05-01T09:00:00Z",
            "source": "google-meet",
            "messageType": "caption_update"
        }),
    )
    .await;
    let event = expect_event(&mut events, "new message", |e| {
        matches!(e, AppEvent::TranscriptNew(_))
    })
    .await;
    let payload = event.payload();
    assert_eq!(payload["text"], "Good morning");
    assert_eq!(payload["speaker"], "Alice");
    assert_eq!(payload["source"], "google-meet");
    assert_eq!(payload["messageType"], "caption_update");

    send_json(
        &mut client,
        json!({
            "type": "message_update",
            "text": "Good morning everyone",
            "oldText": "Good morning",
            "speaker": "Alice",
            "changes": {"added": " everyone"}
        }),
    )
    .await;
    let update = expect_event(&mut events, "message update", |e| {
        matches!(e, AppEvent::TranscriptUpdate(_))
    })
    .await;
    assert_eq!(update.payload()["oldText"], "Good morning");
    assert_eq!(update.payload()["changes"]["added"], " everyone");

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_ignored_and_malformed_messages_keep_connection_open() {
    let (server, sink, addr) = start_server().await;
    let mut events = sink.subscribe();
    let mut client = connect_client(addr, "/").await;

    expect_event(&mut events, "agent connected", |e| {
        matches!(e, AppEvent::CaptureClientConnected { .. })
    })
    .await;

    send_json(&mut client, json!({"type": "keepalive", "timestamp": "T"})).await;
    send_json(&mut client, json!({"type": "bogus", "text": "?"})).await;
    client.send(Message::text("not json")).await.unwrap();
    send_json(
        &mut client,
        json!({"text": "Captions enabled", "speaker": "System", "timestamp": "T"}),
    )
    .await;

    let next = expect_event(&mut events, "next notification", |_| true).await;
    assert_eq!(next.name(), "transcriptionSystemMessage");
    assert!(next.payload().get("messageType").is_none());

    send_json(&mut client, json!({"text": "untyped caption", "speaker": "Bob"})).await;
    let next = expect_event(&mut events, "untyped caption", |_| true).await;
    assert_eq!(next.name(), "transcriptionNewMessage");
    assert_eq!(server.client_count(), 1);

    drop(client);
    server.stop().await;
}

#[tokio::test]
async fn test_client_count_converges_under_churn() {
    let (server, sink, addr) = start_server().await;
    let mut events = sink.subscribe();

    let mut clients = Vec::new();
    for _ in 0..16 {
        clients.push(tokio::spawn(connect_client(addr, "/ws/transcription")));
    }
    let mut connected = Vec::new();
    for handle in clients {
        connected.push(handle.await.unwrap());
    }

    let server_ref = Arc::clone(&server);
    assert!(wait_until(EVENT_TIMEOUT, move || server_ref.client_count() == 16).await);
    assert_eq!(server.status().clients, 16);

    let closers: Vec<_> = connected
        .into_iter()
        .map(|mut client| tokio::spawn(async move { client.close(None).await }))
        .collect();
    for closer in closers {
        let _ = closer.await.unwrap();
    }

    let server_ref = Arc::clone(&server);
    assert!(wait_until(EVENT_TIMEOUT, move || server_ref.client_count() == 0).await);

    let mut disconnected = 0;
    let mut saw_zero = false;
    while disconnected < 16 {
        let event = expect_event(&mut events, "agent disconnected", |e| {
            matches!(e, AppEvent::CaptureClientDisconnected { .. })
        })
        .await;
        disconnected += 1;
        if event.payload()["clients"] == 0 {
            saw_zero = true;
        }
    }
    assert!(saw_zero);

    server.stop().await;
}

#[tokio::test]
async fn test_status_route() {
    let (server, _sink, addr) = start_server().await;

    let response = server
        .router()
        .oneshot(
            Request::builder()
                .uri("/status")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["running"], true);
    assert_eq!(json["clients"], 0);
    assert_eq!(json["port"], addr.port());
    assert_eq!(
        json["endpoint"],
        format!("ws://localhost:{}/ws/transcription", addr.port())
    );

    server.stop().await;
    let status = server.status();
    assert!(!status.running);
    assert!(status.message.is_none());
}

#[tokio::test]
async fn test_stop_disconnects_clients_and_allows_restart() {
    let (server, sink, addr) = start_server().await;
    let mut events = sink.subscribe();
    let mut client = connect_client(addr, "/ws/transcription").await;

    expect_event(&mut events, "agent connected", |e| {
        matches!(e, AppEvent::CaptureClientConnected { .. })
    })
    .await;

    server.stop().await;

    let event = expect_event(&mut events, "agent disconnected", |e| {
        matches!(e, AppEvent::CaptureClientDisconnected { .. })
    })
    .await;
    assert_eq!(event.payload()["clients"], 0);
    assert!(!server.is_running());

    // The client observes the close.
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let addr = server.start().await.unwrap();
    let _client = connect_client(addr, "/ws/transcription").await;
    expect_event(&mut events, "agent reconnected", |e| {
        matches!(e, AppEvent::CaptureClientConnected { .. })
    })
    .await;
    server.stop().await;
}

#[tokio::test]
async fn test_start_twice_fails() {
    let (server, _sink, _addr) = start_server().await;
    assert!(matches!(
        server.start().await,
        Err(IngestError::AlreadyRunning)
    ));
    server.stop().await;
}

#[tokio::test]
async fn test_inject_test_message() {
    let sink = Arc::new(BroadcastSink::new());
    let mut events = sink.subscribe();
    let server = IngestServer::new(test_config(), sink.clone());

    assert!(matches!(
        server.inject_test_message("Tester", "hello"),
        Err(IngestError::NotRunning)
    ));

    server.start().await.unwrap();
    server.inject_test_message("Tester", "hello").unwrap();

    let event = expect_event(&mut events, "test transcription", |e| {
        matches!(e, AppEvent::TranscriptNew(_))
    })
    .await;
    let payload = event.payload();
    assert_eq!(payload["speaker"], "Tester");
    assert_eq!(payload["text"], "hello");
    assert_eq!(payload["source"], "test");
    assert_eq!(payload["messageType"], "caption_update");
    let timestamp = payload["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());

    server.stop().await;
}
