//! Meeting context the chat stream is enriched with.
//!
//! Persistence lives outside this crate; [`ContextStore`] is the boundary.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use yume_protocol::{ChatTurn, TranscriptLine};

/// Read access to per-workspace meeting context.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Transcript lines recorded for the workspace, oldest first.
    async fn transcript(&self, workspace_id: u64) -> Result<Vec<TranscriptLine>>;

    /// Prior chat exchanges, oldest first.
    async fn chat_history(&self, workspace_id: u64) -> Result<Vec<ChatTurn>>;

    /// Meeting notes documents; the first one is the active document.
    async fn meeting_notes(&self, workspace_id: u64) -> Result<Vec<String>>;
}

#[derive(Debug, Default, Clone)]
struct WorkspaceContext {
    transcript: Vec<TranscriptLine>,
    chat_history: Vec<ChatTurn>,
    meeting_notes: Vec<String>,
}

/// In-memory [`ContextStore`].
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    workspaces: RwLock<HashMap<u64, WorkspaceContext>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_transcript(&self, workspace_id: u64, line: TranscriptLine) {
        let mut workspaces = self.workspaces.write().await;
        workspaces
            .entry(workspace_id)
            .or_default()
            .transcript
            .push(line);
    }

    pub async fn push_chat_turn(&self, workspace_id: u64, turn: ChatTurn) {
        let mut workspaces = self.workspaces.write().await;
        workspaces
            .entry(workspace_id)
            .or_default()
            .chat_history
            .push(turn);
    }

    pub async fn set_meeting_notes(&self, workspace_id: u64, notes: impl Into<String>) {
        let mut workspaces = self.workspaces.write().await;
        workspaces.entry(workspace_id).or_default().meeting_notes = vec![notes.into()];
    }

    async fn read<T>(&self, workspace_id: u64, f: impl FnOnce(&WorkspaceContext) -> T) -> Option<T> {
        self.workspaces.read().await.get(&workspace_id).map(f)
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn transcript(&self, workspace_id: u64) -> Result<Vec<TranscriptLine>> {
        Ok(self
            .read(workspace_id, |ctx| ctx.transcript.clone())
            .await
            .unwrap_or_default())
    }

    async fn chat_history(&self, workspace_id: u64) -> Result<Vec<ChatTurn>> {
        Ok(self
            .read(workspace_id, |ctx| ctx.chat_history.clone())
            .await
            .unwrap_or_default())
    }

    async fn meeting_notes(&self, workspace_id: u64) -> Result<Vec<String>> {
        Ok(self
            .read(workspace_id, |ctx| ctx.meeting_notes.clone())
            .await
            .unwrap_or_default())
    }
}
