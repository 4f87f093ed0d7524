//! Event sinks.

use log::{debug, info};
use tokio::sync::broadcast;

use super::types::AppEvent;

/// Size of the broadcast channel for events.
const EVENT_BUFFER_SIZE: usize = 256;

/// One-way notification channel to the rest of the application.
///
/// Emitting never blocks and never fails from the caller's point of view;
/// sinks drop events they cannot deliver.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

/// Fans events out to any number of subscribers (UI bridges, tests).
pub struct BroadcastSink {
    event_tx: broadcast::Sender<AppEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.event_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: AppEvent) {
        let name = event.name();
        if self.event_tx.send(event).is_err() {
            debug!("No subscribers for event {}", name);
        }
    }
}

/// Logs every notification. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: AppEvent) {
        info!("event {}: {}", event.name(), event.payload());
    }
}
