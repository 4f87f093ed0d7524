//! Event dispatch to the application layer.
//!
//! Outbound sessions and the ingestion server never talk to the UI directly;
//! they emit [`AppEvent`]s into an [`EventSink`] owned by the application.

mod sink;
mod types;

pub use sink::{BroadcastSink, EventSink, LogSink};
pub use types::{AppEvent, Notification};
