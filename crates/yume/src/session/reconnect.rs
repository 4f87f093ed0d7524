//! Reconnect supervision for outbound sessions.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use super::{Intent, OutboundSession};
use crate::config::ReconnectConfig;
use crate::events::AppEvent;

/// Fixed-delay retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// `None` retries until the session is closed.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            delay: config.delay(),
            max_attempts: config.max_attempts,
        }
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

impl<R> OutboundSession<R>
where
    R: Serialize + Send + Sync + 'static,
{
    /// Start the supervisor for a connection lost at `epoch`.
    pub(super) fn schedule_reconnect(self: Arc<Self>, epoch: u64) {
        tokio::spawn(async move { self.supervise_reconnect(epoch).await });
    }

    async fn supervise_reconnect(self: Arc<Self>, epoch: u64) {
        let policy = self.settings().reconnect;
        let kind = self.kind();
        let mut attempts = 0u32;

        loop {
            tokio::time::sleep(policy.delay).await;

            if self.intent() != Intent::Active {
                info!("{} reconnect cancelled", kind);
                self.settle_closed();
                return;
            }

            if self.current_epoch().await != epoch {
                debug!("{} already re-established, reconnect not needed", kind);
                return;
            }

            attempts += 1;
            self.sink().emit(AppEvent::SessionReconnecting {
                kind,
                attempt: attempts,
                delay: policy.delay,
            });
            info!("Attempting to reconnect {} WebSocket (attempt {})", kind, attempts);

            match self.establish(Some(epoch)).await {
                Ok(()) => return,
                Err(e) => warn!("{} reconnect attempt {} failed: {}", kind, attempts, e),
            }

            if policy.exhausted(attempts) {
                error!("{} reconnect gave up after {} attempts", kind, attempts);
                self.give_up();
                self.sink()
                    .emit(AppEvent::SessionGaveUp { kind, attempts });
                return;
            }
        }
    }
}
