//! Outbound session error types.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use yume_protocol::CodecError;

use super::SessionKind;

/// Errors surfaced to callers of [`super::OutboundSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend process is not accepting connections.
    #[error(
        "backend not accessible at {url}; ensure the inference server is running: {source}"
    )]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered the health probe but is not ready.
    #[error("backend at {url} is not healthy (status {status}): {detail}")]
    Unhealthy {
        url: String,
        status: String,
        detail: String,
    },

    /// The stream upgrade was rejected with an HTTP response.
    #[error("WebSocket connection to {url} failed (status {status}): {body}")]
    Handshake {
        url: String,
        status: u16,
        body: String,
    },

    /// The stream upgrade failed at the transport level.
    #[error("failed to connect to WebSocket at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("WebSocket handshake with {url} timed out after {timeout:?}")]
    HandshakeTimeout { url: String, timeout: Duration },

    #[error("{kind} WebSocket not connected")]
    NotConnected { kind: SessionKind },

    /// The session was closed while a connection attempt was in flight.
    #[error("{kind} WebSocket was closed")]
    Closed { kind: SessionKind },

    #[error(transparent)]
    Encode(#[from] CodecError),

    /// Writing to an established connection failed.
    #[error("failed to send {kind} WebSocket message: {source}")]
    Send {
        kind: SessionKind,
        #[source]
        source: tungstenite::Error,
    },
}
