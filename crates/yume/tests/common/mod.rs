//! Test utilities: a mock inference backend and event helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use yume::events::{AppEvent, EventSink};
use yume::session::{BackendProbe, OutboundSession, ReconnectPolicy, SessionKind, SessionSettings};

/// Upper bound for anything a test waits on.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect delay used by test sessions.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Instruction pushed to every open stream on the mock backend.
#[derive(Debug, Clone)]
pub enum MockCommand {
    /// Write a text frame.
    Send(String),
    /// Send a ping control frame.
    Ping,
    /// Drop the socket without a closing handshake.
    DropAll,
}

#[derive(Clone)]
struct MockState {
    healthy: Arc<AtomicBool>,
    connections: Arc<AtomicUsize>,
    pongs: Arc<AtomicUsize>,
    commands: broadcast::Sender<MockCommand>,
    received: mpsc::UnboundedSender<String>,
}

/// In-process stand-in for the inference backend.
///
/// Serves `/health`, `/ws/chat` and `/ws/markdown_agent`. Text frames the
/// client sends are recorded; frames are pushed to clients on command.
pub struct MockBackend {
    pub addr: SocketAddr,
    state: MockState,
    received: Mutex<mpsc::UnboundedReceiver<String>>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let (commands, _) = broadcast::channel(64);
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let state = MockState {
            healthy: Arc::new(AtomicBool::new(true)),
            connections: Arc::new(AtomicUsize::new(0)),
            pongs: Arc::new(AtomicUsize::new(0)),
            commands,
            received: received_tx,
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/ws/chat", get(stream_endpoint))
            .route("/ws/markdown_agent", get(stream_endpoint))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            received: Mutex::new(received_rx),
            task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Stream connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize) {
        assert!(
            wait_until(EVENT_TIMEOUT, || self.connections() >= count).await,
            "expected {} backend connections, saw {}",
            count,
            self.connections()
        );
    }

    /// Push a raw text frame to every open stream.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.state.commands.send(MockCommand::Send(text.into()));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(value.to_string());
    }

    /// Pongs received from clients so far.
    pub fn pongs(&self) -> usize {
        self.state.pongs.load(Ordering::SeqCst)
    }

    pub fn ping_all(&self) {
        let _ = self.state.commands.send(MockCommand::Ping);
    }

    pub fn drop_all(&self) {
        let _ = self.state.commands.send(MockCommand::DropAll);
    }

    /// Next text frame a client sent.
    pub async fn next_received(&self) -> String {
        let mut received = self.received.lock().await;
        tokio::time::timeout(EVENT_TIMEOUT, received.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("mock backend channel closed")
    }

    pub async fn try_received(&self) -> Option<String> {
        self.received.lock().await.try_recv().ok()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn health(State(state): State<MockState>) -> Response {
    if state.healthy.load(Ordering::SeqCst) {
        Json(json!({"status": "ok", "message": "Server is running"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "loading", "message": "Model is loading"})),
        )
            .into_response()
    }
}

async fn stream_endpoint(State(state): State<MockState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

async fn handle_stream(mut socket: WebSocket, state: MockState) {
    let mut commands = state.commands.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = state.received.send(text.to_string());
                }
                Some(Ok(Message::Pong(_))) => {
                    state.pongs.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Ok(MockCommand::Send(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(MockCommand::Ping) => {
                    if socket.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
                Ok(MockCommand::DropAll) => return,
                Err(_) => break,
            },
        }
    }
}

/// Settings for a session against `backend`, with test-friendly timings.
pub fn session_settings(backend: &MockBackend, path: &str) -> SessionSettings {
    SessionSettings {
        url: backend.ws_url(path),
        handshake_timeout: Duration::from_secs(5),
        keepalive: Duration::from_secs(10),
        read_timeout: Duration::from_secs(10),
        reconnect: ReconnectPolicy::fixed(RECONNECT_DELAY),
    }
}

pub fn probe_for(base_url: &str) -> BackendProbe {
    BackendProbe::new(
        reqwest::Client::new(),
        format!("{}/health", base_url),
        Duration::from_secs(2),
    )
}

pub fn session<R>(
    backend: &MockBackend,
    kind: SessionKind,
    sink: Arc<dyn EventSink>,
) -> Arc<OutboundSession<R>>
where
    R: serde::Serialize + Send + Sync + 'static,
{
    OutboundSession::new(
        kind,
        session_settings(backend, kind.default_path()),
        probe_for(&backend.base_url()),
        sink,
    )
}

/// Receive events until one matches `predicate`.
pub async fn expect_event<F>(
    rx: &mut broadcast::Receiver<AppEvent>,
    what: &str,
    predicate: F,
) -> AppEvent
where
    F: Fn(&AppEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) if predicate(&event) => return event,
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => panic!("event channel failed while waiting for {}: {}", what, e),
            Err(_) => panic!("timed out waiting for {}", what),
        }
    }
}

/// Collect every event received until one matches `last` (inclusive).
pub async fn collect_until<F>(rx: &mut broadcast::Receiver<AppEvent>, last: F) -> Vec<AppEvent>
where
    F: Fn(&AppEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out; collected so far: {:?}", events))
            .expect("event channel failed");
        let done = last(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Assert no matching event arrives within `window`.
pub async fn assert_no_event<F>(rx: &mut broadcast::Receiver<AppEvent>, window: Duration, predicate: F)
where
    F: Fn(&AppEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(received) = tokio::time::timeout_at(deadline, rx.recv()).await {
        if let Ok(event) = received {
            assert!(!predicate(&event), "unexpected event: {:?}", event);
        }
    }
}

/// Poll `condition` with backoff until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(10);
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(Duration::from_millis(200));
    }
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
