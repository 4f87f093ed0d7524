//! Inbound ingestion of live captions from the browser capture agent.

mod forward;
mod registry;
mod server;

use thiserror::Error;

pub use forward::{forward, translate};
pub use registry::{ClientInfo, ClientRegistry};
pub use server::{IngestServer, IngestStatus};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to bind transcription server to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcription server is already running")]
    AlreadyRunning,

    #[error("transcription server is not running")]
    NotRunning,
}
