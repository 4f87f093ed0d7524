//! Typed application notifications.
//!
//! Every event maps to a stable name and JSON payload, the contract the UI
//! layer listens on.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use yume_protocol::{CaptureEvent, Frame, FrameKind};

use crate::session::SessionKind;

/// Notifications emitted by the streaming core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    // ========== Outbound session lifecycle ==========
    /// Handshake completed; the session accepts sends.
    SessionConnected { kind: SessionKind },

    /// The session's connection ended. `reconnecting` is false when the
    /// session was closed deliberately.
    SessionDisconnected {
        kind: SessionKind,
        reconnecting: bool,
    },

    /// A reconnect attempt is about to start.
    SessionReconnecting {
        kind: SessionKind,
        attempt: u32,
        delay: Duration,
    },

    /// The retry budget ran out; no further attempts will be made.
    SessionGaveUp { kind: SessionKind, attempts: u32 },

    // ========== Outbound stream frames ==========
    StreamStart { kind: SessionKind, message: String },

    /// Incremental text.
    StreamChunk {
        kind: SessionKind,
        token: String,
        done: bool,
        model: Option<String>,
    },

    StreamDone { kind: SessionKind, message: String },

    /// Backend-reported error, or a connection error seen by the receive loop.
    StreamError { kind: SessionKind, error: String },

    StreamInfo { kind: SessionKind, message: String },

    // ========== Capture ingestion ==========
    /// A capture agent attached; `clients` is the new total.
    CaptureClientConnected { clients: usize },

    /// A capture agent detached; `clients` is the remaining total.
    CaptureClientDisconnected { clients: usize },

    TranscriptNew(CaptureEvent),
    TranscriptUpdate(CaptureEvent),
    TranscriptSystem(CaptureEvent),
}

/// Name + payload pair delivered to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: &'static str,
    pub payload: Value,
}

impl AppEvent {
    /// Translate a backend frame into the event for `kind`'s stream.
    ///
    /// Returns `None` for frame kinds this build does not understand.
    pub fn from_frame(kind: SessionKind, frame: Frame) -> Option<Self> {
        let event = match frame.kind {
            FrameKind::Start => AppEvent::StreamStart {
                kind,
                message: frame.message,
            },
            FrameKind::Token => AppEvent::StreamChunk {
                kind,
                token: frame.content,
                done: frame.done,
                model: match kind {
                    SessionKind::Chat => None,
                    SessionKind::MarkdownAgent => Some(frame.model.unwrap_or_default()),
                },
            },
            FrameKind::Complete => AppEvent::StreamDone {
                kind,
                message: frame.message,
            },
            FrameKind::Error => AppEvent::StreamError {
                kind,
                error: frame.message,
            },
            FrameKind::Info => AppEvent::StreamInfo {
                kind,
                message: frame.message,
            },
            FrameKind::Unknown(_) => return None,
        };
        Some(event)
    }

    /// Event name the UI subscribes to.
    pub fn name(&self) -> &'static str {
        use SessionKind::{Chat, MarkdownAgent};

        match self {
            AppEvent::SessionConnected { kind: Chat } => "websocketConnected",
            AppEvent::SessionConnected { kind: MarkdownAgent } => {
                "markdownAgentWebSocketConnected"
            }
            AppEvent::SessionDisconnected { kind: Chat, .. } => "websocketDisconnected",
            AppEvent::SessionDisconnected {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentWebSocketDisconnected",
            AppEvent::SessionReconnecting { kind: Chat, .. } => "websocketReconnecting",
            AppEvent::SessionReconnecting {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentWebSocketReconnecting",
            AppEvent::SessionGaveUp { kind: Chat, .. } => "websocketGaveUp",
            AppEvent::SessionGaveUp {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentWebSocketGaveUp",
            AppEvent::StreamStart { kind: Chat, .. } => "chatStreamStart",
            AppEvent::StreamStart {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentStreamStart",
            AppEvent::StreamChunk { kind: Chat, .. } => "chatStreamChunk",
            AppEvent::StreamChunk {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentStreamChunk",
            AppEvent::StreamDone { kind: Chat, .. } => "chatStreamDone",
            AppEvent::StreamDone {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentStreamDone",
            AppEvent::StreamError { kind: Chat, .. } => "chatStreamError",
            AppEvent::StreamError {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentError",
            AppEvent::StreamInfo { kind: Chat, .. } => "chatStreamInfo",
            AppEvent::StreamInfo {
                kind: MarkdownAgent,
                ..
            } => "markdownAgentStreamInfo",
            AppEvent::CaptureClientConnected { .. } => "transcriptionExtensionConnected",
            AppEvent::CaptureClientDisconnected { .. } => "transcriptionExtensionDisconnected",
            AppEvent::TranscriptNew(_) => "transcriptionNewMessage",
            AppEvent::TranscriptUpdate(_) => "transcriptionMessageUpdate",
            AppEvent::TranscriptSystem(_) => "transcriptionSystemMessage",
        }
    }

    /// JSON payload carried with the event.
    pub fn payload(&self) -> Value {
        match self {
            AppEvent::SessionConnected { kind } => json!({
                "connected": true,
                "message": connected_message(*kind),
            }),
            AppEvent::SessionDisconnected { kind, reconnecting } => json!({
                "connected": false,
                "message": disconnected_message(*kind, *reconnecting),
            }),
            AppEvent::SessionReconnecting { attempt, delay, .. } => json!({
                "attempt": attempt,
                "delayMs": delay.as_millis() as u64,
            }),
            AppEvent::SessionGaveUp { attempts, .. } => json!({ "attempts": attempts }),
            AppEvent::StreamStart { message, .. } | AppEvent::StreamInfo { message, .. } => {
                json!({ "message": message })
            }
            AppEvent::StreamChunk {
                token, done, model, ..
            } => {
                let mut payload = json!({ "token": token, "done": done });
                if let Some(model) = model {
                    payload["model"] = json!(model);
                }
                payload
            }
            AppEvent::StreamDone { message, .. } => json!({ "done": true, "message": message }),
            AppEvent::StreamError { error, .. } => json!({ "error": error }),
            AppEvent::CaptureClientConnected { clients } => json!({
                "connected": true,
                "message": "Chrome extension connected - Ready for live transcription!",
                "clients": clients,
            }),
            AppEvent::CaptureClientDisconnected { clients } => json!({
                "connected": false,
                "message": "Chrome extension disconnected",
                "clients": clients,
            }),
            AppEvent::TranscriptNew(event) => {
                let mut payload = transcript_fields(event);
                payload.insert("messageType".into(), json!(event.message_type));
                Value::Object(payload)
            }
            AppEvent::TranscriptUpdate(event) => {
                let mut payload = transcript_fields(event);
                payload.insert("messageType".into(), json!(event.message_type));
                payload.insert("oldText".into(), json!(event.old_text));
                payload.insert(
                    "changes".into(),
                    event.changes.clone().unwrap_or(Value::Null),
                );
                Value::Object(payload)
            }
            AppEvent::TranscriptSystem(event) => Value::Object(transcript_fields(event)),
        }
    }

    pub fn to_notification(&self) -> Notification {
        Notification {
            event: self.name(),
            payload: self.payload(),
        }
    }

    /// Session the event belongs to, if any.
    pub fn session_kind(&self) -> Option<SessionKind> {
        match self {
            AppEvent::SessionConnected { kind }
            | AppEvent::SessionDisconnected { kind, .. }
            | AppEvent::SessionReconnecting { kind, .. }
            | AppEvent::SessionGaveUp { kind, .. }
            | AppEvent::StreamStart { kind, .. }
            | AppEvent::StreamChunk { kind, .. }
            | AppEvent::StreamDone { kind, .. }
            | AppEvent::StreamError { kind, .. }
            | AppEvent::StreamInfo { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

fn transcript_fields(event: &CaptureEvent) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("text".into(), json!(event.text));
    fields.insert("speaker".into(), json!(event.speaker));
    fields.insert("timestamp".into(), json!(event.timestamp));
    fields.insert("source".into(), json!(event.source));
    fields
}

fn connected_message(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Chat => "Connected - Ready for real-time chat!",
        SessionKind::MarkdownAgent => {
            "Markdown Agent Connected - Ready for meeting notes assistance!"
        }
    }
}

fn disconnected_message(kind: SessionKind, reconnecting: bool) -> &'static str {
    match (kind, reconnecting) {
        (SessionKind::Chat, true) => "Disconnected - Attempting to reconnect...",
        (SessionKind::Chat, false) => "Disconnected",
        (SessionKind::MarkdownAgent, true) => {
            "Markdown Agent Disconnected - Attempting to reconnect..."
        }
        (SessionKind::MarkdownAgent, false) => "Markdown Agent Disconnected",
    }
}
