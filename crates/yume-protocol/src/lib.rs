//! Wire types for the Yume streaming connection core.
//!
//! Two streams share this vocabulary:
//!
//! - Outbound sessions to the inference backend (`/ws/chat`,
//!   `/ws/markdown_agent`) send [`ChatRequest`] / [`AgentRequest`] payloads and
//!   receive [`Frame`]s.
//! - The inbound ingestion server receives [`CaptureEvent`]s pushed by the
//!   browser capture agent.
//!
//! Decoding never panics: malformed input yields a [`CodecError`] and the
//! caller decides whether the frame is dropped or the stream ends.

pub mod capture;
pub mod frames;
pub mod health;
pub mod requests;

pub use capture::{CaptureEvent, CaptureKind, decode_capture};
pub use frames::{Frame, FrameKind, decode_frame};
pub use health::HealthStatus;
pub use requests::{AgentRequest, ChatRequest, ChatRole, ChatTurn, TranscriptLine};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was not valid JSON or lacked a required field.
    #[error("invalid frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// A value could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize an outbound message into the text frame sent on the wire.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

/// Deserialize a field so that an explicit JSON `null` reads as its default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
