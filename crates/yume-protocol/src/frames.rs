//! Frames streamed back by the inference backend.

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// One unit on an outbound session's stream.
///
/// `kind` selects which of the remaining fields are meaningful:
/// `token` frames carry `content` and `done`, everything else carries
/// `message`. Fields the backend omits decode to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// Incremental text (token frames).
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub content: String,

    /// Human-readable text (start, complete, error, info frames).
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub message: String,

    /// Set on the final token of a stream.
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub done: bool,

    /// Model that produced the token, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Frame {
    /// Build a frame of the given kind with every other field defaulted.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            content: String::new(),
            message: String::new(),
            done: false,
            model: None,
        }
    }
}

/// Frame discriminator.
///
/// Unrecognized values are preserved in [`FrameKind::Unknown`] rather than
/// failing the decode, so newer backends can add frame types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FrameKind {
    Start,
    Token,
    Complete,
    Error,
    Info,
    Unknown(String),
}

impl FrameKind {
    pub fn as_str(&self) -> &str {
        match self {
            FrameKind::Start => "start",
            FrameKind::Token => "token",
            FrameKind::Complete => "complete",
            FrameKind::Error => "error",
            FrameKind::Info => "info",
            FrameKind::Unknown(raw) => raw,
        }
    }
}

impl From<String> for FrameKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "start" => FrameKind::Start,
            "token" => FrameKind::Token,
            "complete" => FrameKind::Complete,
            "error" => FrameKind::Error,
            "info" => FrameKind::Info,
            _ => FrameKind::Unknown(raw),
        }
    }
}

impl From<FrameKind> for String {
    fn from(kind: FrameKind) -> Self {
        match kind {
            FrameKind::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Decode one text frame received from the backend.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}
