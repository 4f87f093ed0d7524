//! Outbound streaming sessions to the inference backend.
//!
//! One generic [`OutboundSession`] serves both streams; the
//! [`SessionKind`] picks the endpoint, keepalive period and event names.
//!
//! ```text
//!   send(R) ──► writer ──────────────► backend
//!                                        │
//!   EventSink ◄── receive loop ◄─────────┘
//!                     │ read error / deadline
//!                     ▼
//!               cleanup ──► reconnect supervisor ──► establish
//! ```

mod error;
mod outbound;
mod probe;
mod reconnect;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

pub use error::SessionError;
pub use outbound::{Intent, OutboundSession};
pub use probe::BackendProbe;
pub use reconnect::ReconnectPolicy;

/// The two streams the application keeps open to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Chat,
    MarkdownAgent,
}

impl SessionKind {
    pub fn default_path(self) -> &'static str {
        match self {
            SessionKind::Chat => "/ws/chat",
            SessionKind::MarkdownAgent => "/ws/markdown_agent",
        }
    }

    pub fn default_keepalive(self) -> Duration {
        match self {
            SessionKind::Chat => Duration::from_secs(10),
            SessionKind::MarkdownAgent => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Chat => write!(f, "Chat"),
            SessionKind::MarkdownAgent => write!(f, "Markdown Agent"),
        }
    }
}

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// WebSocket URL of the stream endpoint.
    pub url: String,
    pub handshake_timeout: Duration,
    pub keepalive: Duration,
    pub read_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig, kind: SessionKind) -> Self {
        let session = config.session(kind);
        Self {
            url: config.backend.ws_url(session.path(kind)),
            handshake_timeout: config.backend.handshake_timeout(),
            keepalive: session.keepalive(kind),
            read_timeout: session.read_timeout(),
            reconnect: ReconnectPolicy::from_config(&config.reconnect),
        }
    }
}
