//! Capture event to application event translation.

use log::{debug, warn};
use yume_protocol::{CaptureEvent, CaptureKind};

use crate::events::{AppEvent, EventSink};

/// Speaker name the extension uses for its own status lines.
const SYSTEM_SPEAKER: &str = "System";

/// Map a decoded capture event to the notification it produces, if any.
pub fn translate(event: CaptureEvent) -> Option<AppEvent> {
    match event.kind {
        CaptureKind::NewMessage => Some(AppEvent::TranscriptNew(event)),
        CaptureKind::MessageUpdate => Some(AppEvent::TranscriptUpdate(event)),
        CaptureKind::Keepalive => {
            debug!("Received keepalive from capture agent");
            None
        }
        CaptureKind::Unspecified if event.speaker == SYSTEM_SPEAKER => {
            Some(AppEvent::TranscriptSystem(event))
        }
        // Older extension builds omit `type` on caption lines.
        CaptureKind::Unspecified => Some(AppEvent::TranscriptNew(event)),
        CaptureKind::Unknown(ref raw) => {
            warn!("Unknown capture event type: {}", raw);
            None
        }
    }
}

/// Translate and emit. Returns whether a notification was produced.
pub fn forward(sink: &dyn EventSink, event: CaptureEvent) -> bool {
    match translate(event) {
        Some(app_event) => {
            sink.emit(app_event);
            true
        }
        None => false,
    }
}
