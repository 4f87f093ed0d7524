//! Configuration for the streaming core.
//!
//! Loaded from a TOML file layered with `YUME__SECTION__KEY` environment
//! overrides. Every section has defaults, so an empty or missing file yields
//! the stock localhost setup.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::session::SessionKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub profile: String,
    pub logging: LoggingConfig,
    /// Inference backend location and handshake limits.
    pub backend: BackendConfig,
    /// Per-stream endpoint and liveness settings.
    pub sessions: SessionsConfig,
    /// Automatic recovery of dropped outbound sessions.
    pub reconnect: ReconnectConfig,
    /// Capture agent ingestion server.
    pub ingest: IngestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: "default".to_string(),
            logging: LoggingConfig::default(),
            backend: BackendConfig::default(),
            sessions: SessionsConfig::default(),
            reconnect: ReconnectConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load the configuration file (if present) and apply environment
    /// overrides carrying `env_prefix`.
    pub fn load(path: &Path, env_prefix: &str) -> Result<Self> {
        let built = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("reading config from {}", path.display()))?;

        built
            .try_deserialize()
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Render as TOML, used when writing the default config file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config to TOML")
    }

    pub fn session(&self, kind: SessionKind) -> &SessionConfig {
        match kind {
            SessionKind::Chat => &self.sessions.chat,
            SessionKind::MarkdownAgent => &self.sessions.markdown_agent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// HTTP base URL of the inference backend.
    pub base_url: String,
    /// Health endpoint probed before every handshake.
    pub health_path: String,
    pub probe_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            health_path: "/health".to_string(),
            probe_timeout_secs: 5,
            handshake_timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    /// WebSocket URL for a stream path on the backend.
    pub fn ws_url(&self, path: &str) -> String {
        let base = self
            .base_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}{}", base, normalize_path(path))
    }

    pub fn health_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            normalize_path(&self.health_path)
        )
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub chat: SessionConfig,
    pub markdown_agent: SessionConfig,
}

/// Settings for one outbound stream. Unset fields fall back to the
/// per-kind defaults from [`SessionKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stream endpoint path on the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Interval between keepalive pings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keepalive_secs: Option<u64>,
    /// Rolling read deadline; the session is torn down after this long
    /// without a decoded frame or pong.
    pub read_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: None,
            keepalive_secs: None,
            read_timeout_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn path(&self, kind: SessionKind) -> &str {
        self.path.as_deref().unwrap_or(kind.default_path())
    }

    pub fn keepalive(&self, kind: SessionKind) -> Duration {
        self.keepalive_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(kind.default_keepalive())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay between reconnect attempts.
    pub delay_ms: u64,
    /// Stop retrying after this many failed attempts. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Address to bind the ingestion server to.
    pub host: String,
    /// Port to listen on; `0` picks a free port.
    pub port: u16,
    /// Host name advertised in the status endpoint URL.
    pub public_host: String,
    pub ping_interval_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            public_host: "localhost".to_string(),
            ping_interval_secs: 30,
            read_timeout_secs: 60,
        }
    }
}

impl IngestConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}
