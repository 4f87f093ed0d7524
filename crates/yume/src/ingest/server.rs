//! WebSocket server the capture agent pushes captions to.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use yume_protocol::{CaptureEvent, CaptureKind, decode_capture};

use super::forward::forward;
use super::{ClientRegistry, IngestError};
use crate::config::IngestConfig;
use crate::events::{AppEvent, EventSink};
use crate::keepalive::{self, ReadDeadline};

/// How long `stop` waits for the listener and live connections to wind down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on the close handshake with a departing agent.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const READY_MESSAGE: &str = "Transcription server ready for Chrome extension connections";

/// Snapshot returned by [`IngestServer::status`] and `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStatus {
    pub running: bool,
    pub clients: usize,
    pub port: u16,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State shared by the server handle, the router and connection handlers.
struct Shared {
    config: IngestConfig,
    sink: Arc<dyn EventSink>,
    registry: ClientRegistry,
    running: AtomicBool,
    port: AtomicU16,
    /// `true` once `stop` was requested.
    shutdown: watch::Sender<bool>,
    /// Connections whose handler has not finished cleanup.
    live: watch::Sender<usize>,
}

impl Shared {
    fn status(&self) -> IngestStatus {
        let running = self.running.load(Ordering::SeqCst);
        let port = self.port.load(Ordering::SeqCst);
        IngestStatus {
            running,
            clients: self.registry.count(),
            port,
            endpoint: format!("ws://{}:{}/ws/transcription", self.config.public_host, port),
            message: running.then(|| READY_MESSAGE.to_string()),
        }
    }
}

/// Inbound ingestion server.
pub struct IngestServer {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IngestServer {
    pub fn new(config: IngestConfig, sink: Arc<dyn EventSink>) -> Self {
        let port = config.port;
        let (shutdown, _) = watch::channel(false);
        let (live, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                config,
                sink,
                registry: ClientRegistry::new(),
                running: AtomicBool::new(false),
                port: AtomicU16::new(port),
                shutdown,
                live,
            }),
            task: Mutex::new(None),
        }
    }

    /// Router serving the capture WebSocket on `/` and `/ws/transcription`,
    /// plus `GET /status`.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/", get(ws_upgrade))
            .route("/ws/transcription", get(ws_upgrade))
            .route("/status", get(status_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.shared))
    }

    /// Bind and start serving in the background. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, IngestError> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(IngestError::AlreadyRunning);
        }

        let host = self.shared.config.host.as_str();
        let addr = format!("{}:{}", host, self.shared.config.port);
        let listener = TcpListener::bind((host, self.shared.config.port))
            .await
            .map_err(|source| IngestError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| IngestError::Bind { addr, source })?;

        self.shared.port.store(local.port(), Ordering::SeqCst);
        self.shared.shutdown.send_replace(false);
        self.shared.running.store(true, Ordering::SeqCst);

        let app = self.router();
        let shared = Arc::clone(&self.shared);
        let mut stop = self.shared.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|stopping| *stopping).await;
            })
            .await;

            if let Err(e) = result {
                error!("Transcription server error: {}", e);
            }
            shared.running.store(false, Ordering::SeqCst);
        }));

        info!(
            "Transcription WebSocket server listening on {} (ws://{}:{}/ws/transcription)",
            local,
            self.shared.config.public_host,
            local.port()
        );
        Ok(local)
    }

    /// Stop accepting connections and close every live one.
    ///
    /// Returns once each connection has run its cleanup or the drain
    /// timeout passed. A no-op when the server is not running.
    pub async fn stop(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            return;
        };

        info!("Stopping transcription server");
        self.shared.shutdown.send_replace(true);

        if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("Transcription server did not shut down within {:?}", DRAIN_TIMEOUT);
        }
        self.shared.running.store(false, Ordering::SeqCst);

        let mut live = self.shared.live.subscribe();
        if tokio::time::timeout(DRAIN_TIMEOUT, live.wait_for(|count| *count == 0))
            .await
            .is_err()
        {
            warn!("Capture connections still open after {:?}", DRAIN_TIMEOUT);
        }
    }

    pub fn status(&self) -> IngestStatus {
        self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Push a synthetic caption through the same path agent messages take.
    pub fn inject_test_message(&self, speaker: &str, text: &str) -> Result<(), IngestError> {
        if !self.is_running() {
            warn!("Transcription server not running; test message dropped");
            return Err(IngestError::NotRunning);
        }

        let event = CaptureEvent {
            kind: CaptureKind::NewMessage,
            text: text.to_string(),
            speaker: speaker.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            source: "test".to_string(),
            message_type: "caption_update".to_string(),
            ..CaptureEvent::default()
        };
        forward(self.shared.sink.as_ref(), event);
        info!("Sent test transcription: {} from {}", text, speaker);
        Ok(())
    }
}

async fn status_handler(State(shared): State<Arc<Shared>>) -> Json<IngestStatus> {
    Json(shared.status())
}

async fn ws_upgrade(
    State(shared): State<Arc<Shared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("WebSocket connection attempt from: {}", remote);
    ws.on_upgrade(move |socket| handle_capture_connection(socket, shared, remote))
}

#[tracing::instrument(name = "capture_connection", skip(socket, shared))]
async fn handle_capture_connection(socket: WebSocket, shared: Arc<Shared>, remote: SocketAddr) {
    let mut shutdown = shared.shutdown.subscribe();
    shared.live.send_modify(|count| *count += 1);

    let (id, clients) = shared.registry.register(remote);
    info!(
        "Capture agent {} connected from {} (total clients: {})",
        id, remote, clients
    );
    shared
        .sink
        .emit(AppEvent::CaptureClientConnected { clients });

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    let pinger = {
        let sender = Arc::clone(&sender);
        keepalive::spawn_pinger(shared.config.ping_interval(), move || {
            let sender = Arc::clone(&sender);
            async move {
                match sender.lock().await.send(Message::Ping(Default::default())).await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        warn!("Error sending ping to capture agent: {}", e);
                        ControlFlow::Break(())
                    }
                }
            }
        })
    };

    let mut deadline = ReadDeadline::new(shared.config.read_timeout());
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping {
            info!("Closing capture agent {} for server shutdown", id);
            break;
        }

        tokio::select! {
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => match decode_capture(text.as_str().as_bytes()) {
                    Ok(event) => {
                        deadline.renew();
                        debug!(
                            "Received transcription message: {} from {}",
                            event.text, event.speaker
                        );
                        forward(shared.sink.as_ref(), event);
                    }
                    Err(e) => warn!("Failed to parse capture message from {}: {}", id, e),
                },
                Some(Ok(Message::Pong(_))) => {
                    debug!("Received pong from capture agent {}", id);
                    deadline.renew();
                }
                Some(Ok(Message::Close(frame))) => {
                    info!("Capture agent {} disconnected normally: {:?}", id, frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Error reading capture message from {}: {}", id, e);
                    break;
                }
                None => {
                    info!("Capture agent {} connection ended", id);
                    break;
                }
            },
            _ = deadline.expired() => {
                warn!(
                    "Capture agent {} sent nothing for {:?}; closing",
                    id,
                    deadline.window()
                );
                break;
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    pinger.abort();
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
        let mut sender = sender.lock().await;
        sender.close().await
    })
    .await;

    let remaining = shared.registry.remove(&id);
    info!(
        "Capture agent {} disconnected (remaining clients: {})",
        id, remaining
    );
    shared
        .sink
        .emit(AppEvent::CaptureClientDisconnected { clients: remaining });
    shared
        .live
        .send_modify(|count| *count = count.saturating_sub(1));
}
