//! Backend reachability probe run before every handshake.

use std::time::Duration;

use log::{debug, warn};
use yume_protocol::HealthStatus;

use super::SessionError;

/// Checks the backend's dedicated health endpoint.
#[derive(Debug, Clone)]
pub struct BackendProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl BackendProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Query the health endpoint.
    ///
    /// Fails fast with [`SessionError::Unreachable`] when nothing is
    /// listening, and with [`SessionError::Unhealthy`] when the backend
    /// answers but does not report a healthy status.
    pub async fn check(&self) -> Result<HealthStatus, SessionError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| {
                warn!("Backend health probe to {} failed: {}", self.url, source);
                SessionError::Unreachable {
                    url: self.url.clone(),
                    source,
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!(
                "Backend health probe to {} returned {}: {}",
                self.url, status, body
            );
            return Err(SessionError::Unhealthy {
                url: self.url.clone(),
                status: status.as_u16().to_string(),
                detail: body,
            });
        }

        let health: HealthStatus =
            serde_json::from_str(&body).map_err(|e| SessionError::Unhealthy {
                url: self.url.clone(),
                status: "unparsable".to_string(),
                detail: format!("{}: {}", e, body),
            })?;

        if !health.is_healthy() {
            return Err(SessionError::Unhealthy {
                url: self.url.clone(),
                status: health.status,
                detail: health.message,
            });
        }

        debug!("Backend at {} is healthy: {}", self.url, health.message);
        Ok(health)
    }
}
