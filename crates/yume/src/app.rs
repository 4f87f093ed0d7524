//! Application handle owning every streaming component.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use yume_protocol::{AgentRequest, ChatRequest, HealthStatus};

use crate::config::AppConfig;
use crate::context::ContextStore;
use crate::events::EventSink;
use crate::ingest::{IngestError, IngestServer, IngestStatus};
use crate::session::{BackendProbe, OutboundSession, SessionError, SessionKind, SessionSettings};

/// System prompt used by [`StreamCore::send_simple_chat_message`].
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// The streaming connection core.
///
/// Built once by the application and shared by reference; owns the chat
/// and markdown agent sessions and the capture ingestion server.
pub struct StreamCore {
    config: AppConfig,
    probe: BackendProbe,
    chat: Arc<OutboundSession<ChatRequest>>,
    markdown_agent: Arc<OutboundSession<AgentRequest>>,
    ingest: IngestServer,
    context: Arc<dyn ContextStore>,
}

impl StreamCore {
    pub fn new(
        config: AppConfig,
        sink: Arc<dyn EventSink>,
        context: Arc<dyn ContextStore>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("building HTTP client")?;
        let probe = BackendProbe::new(
            http,
            config.backend.health_url(),
            config.backend.probe_timeout(),
        );

        let chat = OutboundSession::new(
            SessionKind::Chat,
            SessionSettings::from_config(&config, SessionKind::Chat),
            probe.clone(),
            Arc::clone(&sink),
        );
        let markdown_agent = OutboundSession::new(
            SessionKind::MarkdownAgent,
            SessionSettings::from_config(&config, SessionKind::MarkdownAgent),
            probe.clone(),
            Arc::clone(&sink),
        );
        let ingest = IngestServer::new(config.ingest.clone(), sink);

        Ok(Self {
            config,
            probe,
            chat,
            markdown_agent,
            ingest,
            context,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn chat(&self) -> &Arc<OutboundSession<ChatRequest>> {
        &self.chat
    }

    pub fn markdown_agent(&self) -> &Arc<OutboundSession<AgentRequest>> {
        &self.markdown_agent
    }

    pub fn ingest(&self) -> &IngestServer {
        &self.ingest
    }

    // ========== Chat ==========

    pub async fn connect_chat(&self) -> Result<(), SessionError> {
        self.chat.connect().await
    }

    pub async fn chat_connected(&self) -> bool {
        self.chat.is_connected().await
    }

    /// Send a chat message enriched with the workspace's meeting context.
    pub async fn send_chat_message(
        &self,
        workspace_id: u64,
        message: &str,
        system_prompt: &str,
    ) -> Result<(), SessionError> {
        if !self.chat.is_connected().await {
            return Err(SessionError::NotConnected {
                kind: SessionKind::Chat,
            });
        }

        let request = self
            .build_chat_request(workspace_id, message, system_prompt)
            .await;
        self.chat.send(&request).await
    }

    pub async fn send_simple_chat_message(
        &self,
        workspace_id: u64,
        message: &str,
    ) -> Result<(), SessionError> {
        self.send_chat_message(workspace_id, message, DEFAULT_SYSTEM_PROMPT)
            .await
    }

    pub async fn disconnect_chat(&self) {
        self.chat.close().await;
    }

    /// Assemble the chat payload. Context that cannot be loaded is sent empty.
    pub async fn build_chat_request(
        &self,
        workspace_id: u64,
        message: &str,
        system_prompt: &str,
    ) -> ChatRequest {
        let transcription = self
            .context
            .transcript(workspace_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load transcript for workspace {}: {:#}", workspace_id, e);
                Vec::new()
            });
        let chat_history = self
            .context
            .chat_history(workspace_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load chat history for workspace {}: {:#}", workspace_id, e);
                Vec::new()
            });
        let meeting_notes = self
            .context
            .meeting_notes(workspace_id)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load meeting notes for workspace {}: {:#}", workspace_id, e);
                Vec::new()
            })
            .into_iter()
            .next()
            .unwrap_or_default();

        ChatRequest {
            message: message.to_string(),
            system_prompt: system_prompt.to_string(),
            transcription,
            chat_history,
            meeting_notes,
        }
    }

    // ========== Markdown agent ==========

    pub async fn connect_markdown_agent(&self) -> Result<(), SessionError> {
        self.markdown_agent.connect().await
    }

    pub async fn markdown_agent_connected(&self) -> bool {
        self.markdown_agent.is_connected().await
    }

    pub async fn send_markdown_agent_message(&self, message: &str) -> Result<(), SessionError> {
        self.markdown_agent.send(&AgentRequest::new(message)).await
    }

    pub async fn disconnect_markdown_agent(&self) {
        self.markdown_agent.close().await;
    }

    // ========== Ingestion ==========

    pub async fn start_ingest(&self) -> Result<SocketAddr, IngestError> {
        self.ingest.start().await
    }

    pub fn ingest_status(&self) -> IngestStatus {
        self.ingest.status()
    }

    pub fn send_test_transcription(&self, speaker: &str, text: &str) -> Result<(), IngestError> {
        self.ingest.inject_test_message(speaker, text)
    }

    // ========== Lifecycle ==========

    /// Probe the backend's health endpoint.
    pub async fn health_check(&self) -> Result<HealthStatus, SessionError> {
        self.probe.check().await
    }

    /// Close both sessions and stop the ingestion server.
    pub async fn shutdown(&self) {
        info!("Shutting down streaming core");
        tokio::join!(
            self.chat.close(),
            self.markdown_agent.close(),
            self.ingest.stop()
        );
    }
}
