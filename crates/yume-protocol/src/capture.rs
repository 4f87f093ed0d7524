//! Capture events pushed by the browser extension.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CodecError;

/// A transcript change reported by the capture agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    #[serde(rename = "type", default, deserialize_with = "crate::null_as_default")]
    pub kind: CaptureKind,

    /// Caption text.
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub text: String,

    /// Speaker name, or `System` for extension status lines.
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub speaker: String,

    /// ISO 8601 timestamp supplied by the extension.
    #[serde(default, deserialize_with = "crate::null_as_default")]
    pub timestamp: String,

    /// Origin of the caption (e.g. `google-meet`).
    #[serde(
        default,
        deserialize_with = "crate::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub source: String,

    /// Extension-specific sub-type (e.g. `caption_update`).
    #[serde(
        default,
        deserialize_with = "crate::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub message_type: String,

    /// Previous text, for updates.
    #[serde(
        default,
        deserialize_with = "crate::null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub old_text: String,

    /// Diff descriptor; the extension sends either an object or a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Value>,
}

/// Capture event discriminator. An absent or empty `type` is
/// [`CaptureKind::Unspecified`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CaptureKind {
    NewMessage,
    MessageUpdate,
    Keepalive,
    #[default]
    Unspecified,
    Unknown(String),
}

impl CaptureKind {
    pub fn as_str(&self) -> &str {
        match self {
            CaptureKind::NewMessage => "new_message",
            CaptureKind::MessageUpdate => "message_update",
            CaptureKind::Keepalive => "keepalive",
            CaptureKind::Unspecified => "",
            CaptureKind::Unknown(raw) => raw,
        }
    }
}

impl From<String> for CaptureKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "new_message" => CaptureKind::NewMessage,
            "message_update" => CaptureKind::MessageUpdate,
            "keepalive" => CaptureKind::Keepalive,
            "" => CaptureKind::Unspecified,
            _ => CaptureKind::Unknown(raw),
        }
    }
}

impl From<CaptureKind> for String {
    fn from(kind: CaptureKind) -> Self {
        match kind {
            CaptureKind::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

/// Decode one message received from a capture agent connection.
pub fn decode_capture(bytes: &[u8]) -> Result<CaptureEvent, CodecError> {
    serde_json::from_slice(bytes).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_new_message() {
        let event = decode_capture(
            br#"{"type":"new_message","text":"hello","speaker":"Alice","timestamp":"T","source":"google-meet","messageType":"caption_update"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, CaptureKind::NewMessage);
        assert_eq!(event.speaker, "Alice");
        assert_eq!(event.message_type, "caption_update");
    }

    #[test]
    fn test_missing_type_is_unspecified() {
        let event = decode_capture(br#"{"speaker":"System","text":"Extension ready"}"#).unwrap();
        assert_eq!(event.kind, CaptureKind::Unspecified);

        let event = decode_capture(br#"{"type":"","speaker":"Bob"}"#).unwrap();
        assert_eq!(event.kind, CaptureKind::Unspecified);
    }

    #[test]
    fn test_changes_accepts_object_or_string() {
        let event =
            decode_capture(br#"{"type":"message_update","oldText":"hel","changes":{"added":"lo"}}"#)
                .unwrap();
        assert_eq!(event.old_text, "hel");
        assert_eq!(event.changes, Some(json!({"added": "lo"})));

        let event =
            decode_capture(br#"{"type":"message_update","changes":"+lo"}"#).unwrap();
        assert_eq!(event.changes, Some(json!("+lo")));
    }

    #[test]
    fn test_null_fields_decode_as_empty() {
        let event = decode_capture(
            br#"{"type":null,"text":"Captions on","speaker":"System","timestamp":null,"source":null,"messageType":null,"oldText":null,"changes":null}"#,
        )
        .unwrap();
        assert_eq!(event.kind, CaptureKind::Unspecified);
        assert_eq!(event.text, "Captions on");
        assert_eq!(event.timestamp, "");
        assert_eq!(event.source, "");
        assert_eq!(event.message_type, "");
        assert_eq!(event.old_text, "");
        assert_eq!(event.changes, None);
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let event = decode_capture(br#"{"type":"bogus"}"#).unwrap();
        assert_eq!(event.kind, CaptureKind::Unknown("bogus".to_string()));
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(decode_capture(b"[1,2,3]").is_err());
        assert!(decode_capture(b"caption").is_err());
    }
}
