//! Fixed-interval poll scheduling.
//!
//! The scheduler runs one poll immediately, then one per interval tick,
//! strictly one at a time. A tick that comes due while a poll is still
//! running is skipped rather than queued, so a slow provider never causes a
//! burst of back-to-back polls once it recovers.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use crate::error::AgentError;
use crate::shutdown::Shutdown;

/// Work driven by a [`Scheduler`].
#[async_trait]
pub trait Poller: Send {
    /// Executes one poll. Long-running work should honor `shutdown`.
    async fn poll(&mut self, shutdown: &Shutdown);

    /// Called exactly once after the last poll, before `run` returns.
    async fn on_shutdown(&mut self);
}

/// Drives a [`Poller`] at a fixed cadence until cancelled.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// `AgentError::Config` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, AgentError> {
        if interval.is_zero() {
            return Err(AgentError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self { interval })
    }

    /// The poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs until `shutdown` fires, then calls [`Poller::on_shutdown`].
    pub async fn run<P: Poller + ?Sized>(&self, poller: &mut P, shutdown: &Shutdown) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            poller.poll(shutdown).await;
        }

        debug!("Scheduler stopping");
        poller.on_shutdown().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
