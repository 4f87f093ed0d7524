//! Yume streaming connection core.
//!
//! Long-lived WebSocket sessions that stream tokens from the inference
//! backend, and a WebSocket server that ingests live captions from the
//! browser capture agent. Every component reports to an [`events::EventSink`].

pub mod app;
pub mod config;
pub mod context;
pub mod events;
pub mod ingest;
pub mod keepalive;
pub mod session;

pub use app::StreamCore;
