//! Generic outbound streaming session.

use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use yume_protocol::decode_frame;

use super::{BackendProbe, SessionError, SessionKind, SessionSettings};
use crate::events::{AppEvent, EventSink};
use crate::keepalive::{self, ReadDeadline};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSource = SplitStream<WsStream>;
type Writer = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Bound on the close handshake when tearing a connection down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the owner wants the session to be doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Stay connected; reconnect after failures.
    Active,
    /// `close` was called and the receive loop has not wound down yet.
    Closing,
    /// Closed, or never connected.
    Closed,
}

/// Live connection state, guarded by one lock.
///
/// `epoch` increments whenever a connection is established or a live one is
/// replaced. Tasks capture the epoch they were started for and go quiet
/// once it is stale.
#[derive(Default)]
struct Link {
    epoch: u64,
    connected: bool,
    writer: Option<Writer>,
    reader: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

impl Link {
    fn is_live(&self) -> bool {
        self.writer.is_some() || self.reader.is_some()
    }
}

/// Why a receive loop stopped.
enum LoopEnd {
    /// Peer sent a close frame.
    Closed,
    /// Stream ended without a close frame.
    Eof,
    /// Transport error.
    Failed(String),
    /// Nothing proved the peer alive within the read window.
    TimedOut,
    /// The owner closed the session.
    Cancelled,
}

impl LoopEnd {
    fn connection_error(&self, read_timeout: Duration) -> Option<String> {
        match self {
            LoopEnd::Failed(cause) => Some(cause.clone()),
            LoopEnd::TimedOut => Some(format!("no data received for {:?}", read_timeout)),
            _ => None,
        }
    }
}

/// A long-lived streaming connection to one backend endpoint.
///
/// `R` is the request payload accepted by [`OutboundSession::send`]. Frames
/// received from the backend are translated into [`AppEvent`]s and emitted
/// into the session's sink in arrival order.
pub struct OutboundSession<R> {
    kind: SessionKind,
    settings: SessionSettings,
    probe: BackendProbe,
    sink: Arc<dyn EventSink>,
    link: Mutex<Link>,
    intent: watch::Sender<Intent>,
    /// Serializes connection attempts.
    connecting: Mutex<()>,
    _request: PhantomData<fn(&R)>,
}

impl<R> OutboundSession<R>
where
    R: Serialize + Send + Sync + 'static,
{
    pub fn new(
        kind: SessionKind,
        settings: SessionSettings,
        probe: BackendProbe,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (intent, _) = watch::channel(Intent::Closed);
        Arc::new(Self {
            kind,
            settings,
            probe,
            sink,
            link: Mutex::new(Link::default()),
            intent,
            connecting: Mutex::new(()),
            _request: PhantomData,
        })
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    pub fn intent(&self) -> Intent {
        *self.intent.borrow()
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.connected
    }

    /// Open the stream, replacing any existing connection.
    ///
    /// Probes backend health first, then performs the handshake. On success
    /// the session is connected, a connected event has been emitted and the
    /// receive loop and keepalive are running.
    pub async fn connect(self: &Arc<Self>) -> Result<(), SessionError> {
        self.intent.send_replace(Intent::Active);
        self.establish(None).await
    }

    /// Run one connection attempt.
    ///
    /// With `expected_epoch` set (reconnect attempts), the attempt is skipped
    /// when another caller already re-established the session.
    pub(super) async fn establish(
        self: &Arc<Self>,
        expected_epoch: Option<u64>,
    ) -> Result<(), SessionError> {
        let _attempt = self.connecting.lock().await;

        if let Some(expected) = expected_epoch {
            let current = self.link.lock().await.epoch;
            if current != expected {
                debug!("{} session already re-established, skipping attempt", self.kind);
                return Ok(());
            }
        }

        self.teardown().await;
        self.probe.check().await?;

        let url = self.settings.url.as_str();
        info!("Attempting to connect to {} WebSocket: {}", self.kind, url);

        let stream = match tokio::time::timeout(
            self.settings.handshake_timeout,
            connect_async(url),
        )
        .await
        {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(tungstenite::Error::Http(response))) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_deref()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                error!(
                    "{} WebSocket handshake rejected with status {}: {}",
                    self.kind, status, body
                );
                return Err(SessionError::Handshake {
                    url: url.to_string(),
                    status,
                    body,
                });
            }
            Ok(Err(source)) => {
                error!("{} WebSocket connection failed: {}", self.kind, source);
                return Err(SessionError::Connect {
                    url: url.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(SessionError::HandshakeTimeout {
                    url: url.to_string(),
                    timeout: self.settings.handshake_timeout,
                });
            }
        };

        let (writer, source) = stream.split();
        let writer: Writer = Arc::new(Mutex::new(writer));

        let mut link = self.link.lock().await;
        if self.intent() != Intent::Active {
            drop(link);
            close_writer(&writer).await;
            return Err(SessionError::Closed { kind: self.kind });
        }

        link.epoch += 1;
        let epoch = link.epoch;
        link.connected = true;
        link.writer = Some(writer);
        self.sink.emit(AppEvent::SessionConnected { kind: self.kind });
        link.reader = Some(tokio::spawn(Arc::clone(self).receive_loop(epoch, source)));
        link.keepalive = Some(self.spawn_keepalive(epoch));
        drop(link);

        info!("{} WebSocket connected successfully", self.kind);
        Ok(())
    }

    /// Serialize `request` and write it as one text frame.
    pub async fn send(&self, request: &R) -> Result<(), SessionError> {
        let body = yume_protocol::encode(request)?;

        let (epoch, writer) = {
            let link = self.link.lock().await;
            match (&link.writer, link.connected) {
                (Some(writer), true) => (link.epoch, Arc::clone(writer)),
                _ => return Err(SessionError::NotConnected { kind: self.kind }),
            }
        };

        let len = body.len();
        let result = writer.lock().await.send(Message::text(body)).await;
        if let Err(source) = result {
            warn!("Failed to send {} WebSocket message: {}", self.kind, source);
            let mut link = self.link.lock().await;
            if link.epoch == epoch {
                link.connected = false;
            }
            return Err(SessionError::Send {
                kind: self.kind,
                source,
            });
        }

        debug!("Sent {} WebSocket message ({} bytes)", self.kind, len);
        Ok(())
    }

    /// Close the stream and stop reconnecting. Safe to call repeatedly.
    pub async fn close(&self) {
        let (writer, keepalive) = {
            let mut link = self.link.lock().await;
            let reader_running = link.reader.as_ref().is_some_and(|h| !h.is_finished());
            self.intent.send_replace(if reader_running {
                Intent::Closing
            } else {
                Intent::Closed
            });
            link.connected = false;
            (link.writer.take(), link.keepalive.take())
        };

        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        if let Some(writer) = writer {
            close_writer(&writer).await;
            info!("{} WebSocket closed", self.kind);
        }
    }

    /// Drop a live connection without notifying the sink.
    async fn teardown(&self) {
        let (writer, reader, keepalive) = {
            let mut link = self.link.lock().await;
            if !link.is_live() {
                return;
            }
            link.epoch += 1;
            link.connected = false;
            (link.writer.take(), link.reader.take(), link.keepalive.take())
        };

        debug!("Replacing existing {} connection", self.kind);
        for task in [reader, keepalive].into_iter().flatten() {
            task.abort();
        }
        if let Some(writer) = writer {
            close_writer(&writer).await;
        }
    }

    async fn live_writer(&self, epoch: u64) -> Option<Writer> {
        let link = self.link.lock().await;
        if link.epoch == epoch && link.connected {
            link.writer.clone()
        } else {
            None
        }
    }

    fn spawn_keepalive(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let session = Arc::clone(self);
        keepalive::spawn_pinger(self.settings.keepalive, move || {
            let session = Arc::clone(&session);
            async move { session.ping(epoch).await }
        })
    }

    async fn ping(&self, epoch: u64) -> ControlFlow<()> {
        let Some(writer) = self.live_writer(epoch).await else {
            return ControlFlow::Break(());
        };
        // A failed ping is only logged; the receive loop's deadline decides.
        if let Err(e) = writer.lock().await.send(Message::Ping(Default::default())).await {
            warn!("{} WebSocket ping failed: {}", self.kind, e);
        }
        ControlFlow::Continue(())
    }

    async fn receive_loop(self: Arc<Self>, epoch: u64, mut source: WsSource) {
        let mut deadline = ReadDeadline::new(self.settings.read_timeout);
        let mut intent = self.intent.subscribe();

        let end = loop {
            let active = *intent.borrow_and_update() == Intent::Active;
            if !active {
                break LoopEnd::Cancelled;
            }

            tokio::select! {
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), &mut deadline),
                    // Pings are answered by tungstenite on the next read.
                    Some(Ok(Message::Pong(_))) => deadline.renew(),
                    Some(Ok(Message::Close(frame))) => {
                        debug!("{} WebSocket closed by server: {:?}", self.kind, frame);
                        break LoopEnd::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break LoopEnd::Failed(e.to_string()),
                    None => break LoopEnd::Eof,
                },
                _ = deadline.expired() => break LoopEnd::TimedOut,
                changed = intent.changed() => {
                    if changed.is_err() {
                        break LoopEnd::Cancelled;
                    }
                }
            }
        };

        self.finish(epoch, end).await;
    }

    fn handle_text(&self, text: &str, deadline: &mut ReadDeadline) {
        debug!("Received {} WebSocket message: {}", self.kind, text);

        let frame = match decode_frame(text.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to parse {} WebSocket response: {}", self.kind, e);
                return;
            }
        };
        deadline.renew();

        let raw_kind = frame.kind.clone();
        match AppEvent::from_frame(self.kind, frame) {
            Some(event) => self.sink.emit(event),
            None => warn!(
                "Unknown {} WebSocket response type: {}",
                self.kind,
                raw_kind.as_str()
            ),
        }
    }

    /// Single cleanup path for a receive loop that stopped.
    async fn finish(self: Arc<Self>, epoch: u64, end: LoopEnd) {
        let (writer, keepalive, intent) = {
            let mut link = self.link.lock().await;
            if link.epoch != epoch {
                debug!("Stale {} receive loop exited", self.kind);
                return;
            }
            link.connected = false;
            // Our own handle; dropping it detaches this task.
            link.reader.take();
            (link.writer.take(), link.keepalive.take(), self.intent())
        };

        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        if let Some(writer) = writer {
            close_writer(&writer).await;
        }

        let reconnecting = intent == Intent::Active;
        if reconnecting
            && let Some(cause) = end.connection_error(self.settings.read_timeout)
        {
            error!("{} WebSocket connection error: {}", self.kind, cause);
            self.sink.emit(AppEvent::StreamError {
                kind: self.kind,
                error: format!("Connection error: {}", cause),
            });
        }

        info!("{} WebSocket connection closed", self.kind);
        self.sink.emit(AppEvent::SessionDisconnected {
            kind: self.kind,
            reconnecting,
        });

        if reconnecting {
            self.schedule_reconnect(epoch);
        } else {
            self.settle_closed();
        }
    }

    /// Complete a pending close.
    pub(super) fn settle_closed(&self) {
        self.intent.send_if_modified(|intent| {
            if *intent == Intent::Closing {
                *intent = Intent::Closed;
                true
            } else {
                false
            }
        });
    }

    pub(super) async fn current_epoch(&self) -> u64 {
        self.link.lock().await.epoch
    }

    pub(super) fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub(super) fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub(super) fn give_up(&self) {
        self.intent.send_if_modified(|intent| {
            if *intent == Intent::Active {
                *intent = Intent::Closed;
                true
            } else {
                false
            }
        });
    }
}

async fn close_writer(writer: &Writer) {
    let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
        let mut writer = writer.lock().await;
        writer.close().await
    })
    .await;

    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("WebSocket close failed: {}", e),
        Err(_) => debug!("WebSocket close timed out"),
    }
}
