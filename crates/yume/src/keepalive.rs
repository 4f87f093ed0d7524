//! Liveness helpers shared by every long-lived connection.
//!
//! Two halves: a rolling [`ReadDeadline`] that the reader renews whenever
//! the peer proves it is alive, and [`spawn_pinger`], a periodic task that
//! sends ping control frames. Only the reader decides a connection is dead.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, Sleep};

/// Rolling read deadline measured from the last proof of life.
#[derive(Debug, Clone, Copy)]
pub struct ReadDeadline {
    window: Duration,
    deadline: Instant,
}

impl ReadDeadline {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Instant::now() + window,
        }
    }

    /// Push the deadline out to one full window from now.
    pub fn renew(&mut self) {
        self.deadline = Instant::now() + self.window;
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Resolves once the deadline passes. Re-create after each `renew`.
    pub fn expired(&self) -> Sleep {
        tokio::time::sleep_until(self.deadline)
    }
}

/// Spawn a task calling `tick` every `period`, starting one period from now.
///
/// The task ends when `tick` returns [`ControlFlow::Break`] or when the
/// returned handle is aborted.
pub fn spawn_pinger<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if tick().await.is_break() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_deadline_renew_extends_window() {
        let mut deadline = ReadDeadline::new(Duration::from_millis(80));
        tokio::time::sleep(Duration::from_millis(50)).await;
        deadline.renew();
        assert!(deadline.remaining() > Duration::from_millis(60));

        let started = Instant::now();
        deadline.expired().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_pinger_stops_on_break() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);

        let handle = spawn_pinger(Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            }
        });

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("pinger should stop")
            .unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pinger_waits_one_period_before_first_tick() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);

        let handle = spawn_pinger(Duration::from_millis(200), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        handle.abort();
    }
}
