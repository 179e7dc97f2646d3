//! Per-provider polling pipeline.
//!
//! An [`Orchestrator`] owns everything one provider account needs: the
//! fetcher, the auth retry policy, the session and reset-cycle trackers and
//! an optional notifier. Its state lives in a single task and is only
//! mutated from the sequential poll path; other tasks observe it through
//! [`AgentStatus`] snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotawatch_core::Snapshot;
use quotawatch_fetch::{CredentialRefresher, ErrorKind, UsageFetcher};
use quotawatch_store::Store;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::circuit::{AuthRetryPolicy, DEFAULT_AUTH_FAILURE_THRESHOLD, PollOutcome};
use crate::error::AgentError;
use crate::normalize::Normalizer;
use crate::notify::{Notifier, QuotaStatus};
use crate::scheduler::{Poller, Scheduler};
use crate::session::{DEFAULT_IDLE_TIMEOUT, SessionManager};
use crate::shutdown::Shutdown;
use crate::tracker::ResetTracker;

// ============================================================================
// Configuration
// ============================================================================

/// Timing and breaker settings for one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Time between poll starts.
    pub poll_interval: Duration,
    /// Quiet period after which a session closes.
    pub idle_timeout: Duration,
    /// Consecutive post-retry auth failures before polling pauses.
    pub auth_failure_threshold: u32,
}

impl OrchestratorConfig {
    /// Creates a config with default idle timeout and threshold.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            auth_failure_threshold: DEFAULT_AUTH_FAILURE_THRESHOLD,
        }
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the auth failure threshold.
    #[must_use]
    pub fn with_auth_failure_threshold(mut self, threshold: u32) -> Self {
        self.auth_failure_threshold = threshold;
        self
    }
}

// ============================================================================
// Polling Switch
// ============================================================================

/// Shared on/off switch for an orchestrator's polling.
#[derive(Debug, Clone)]
pub struct PollingSwitch(Arc<AtomicBool>);

impl Default for PollingSwitch {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl PollingSwitch {
    /// Whether polls run.
    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Turns polling on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Release);
    }
}

// ============================================================================
// Status
// ============================================================================

/// Point-in-time view of an orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStatus {
    /// Provider instance name.
    pub provider: String,
    /// Poll cycles executed (including skipped ones).
    pub polls: u64,
    /// Start of the last poll cycle.
    pub last_poll: Option<DateTime<Utc>>,
    /// Capture time of the last successful fetch.
    pub last_success: Option<DateTime<Utc>>,
    /// Last fetch error, cleared on success.
    pub last_error: Option<String>,
    /// Consecutive post-retry auth failures.
    pub auth_failures: u32,
    /// Whether the auth breaker is open.
    pub paused: bool,
    /// Id of the open usage session.
    pub active_session: Option<String>,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Polls one provider account until cancelled.
pub struct Orchestrator<F, N> {
    scheduler: Scheduler,
    cycle: PollCycle<F, N>,
}

impl<F, N> Orchestrator<F, N>
where
    F: UsageFetcher + 'static,
    N: Normalizer + 'static,
{
    /// Creates an orchestrator. The provider name comes from the fetcher.
    ///
    /// # Errors
    ///
    /// `AgentError::Config` if the poll interval is zero.
    pub fn new(
        fetcher: F,
        normalizer: N,
        store: Arc<dyn Store>,
        config: OrchestratorConfig,
    ) -> Result<Self, AgentError> {
        let scheduler = Scheduler::new(config.poll_interval)?;
        let provider = fetcher.provider().to_string();
        let (status, _) = watch::channel(AgentStatus {
            provider: provider.clone(),
            ..AgentStatus::default()
        });

        Ok(Self {
            scheduler,
            cycle: PollCycle {
                sessions: SessionManager::new(&provider, store.clone(), config.idle_timeout),
                tracker: ResetTracker::new(&provider, store.clone()),
                policy: AuthRetryPolicy::new(config.auth_failure_threshold),
                provider,
                fetcher,
                normalizer,
                store,
                notifier: None,
                switch: PollingSwitch::default(),
                status,
            },
        })
    }

    /// Attaches a credential source to the auth retry policy.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.cycle.policy = self.cycle.policy.with_refresher(refresher);
        self
    }

    /// Attaches a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.cycle.notifier = Some(notifier);
        self
    }

    /// Provider instance name.
    pub fn provider(&self) -> &str {
        &self.cycle.provider
    }

    /// Handle for enabling or disabling polling.
    pub fn polling_switch(&self) -> PollingSwitch {
        self.cycle.switch.clone()
    }

    /// Subscribes to status updates.
    pub fn status(&self) -> watch::Receiver<AgentStatus> {
        self.cycle.status.subscribe()
    }

    /// Runs until `shutdown` fires.
    ///
    /// Sessions left open by a previous process are closed first. The open
    /// session, if any, is closed before this returns.
    ///
    /// # Errors
    ///
    /// `AgentError::Bootstrap` if the startup store bookkeeping fails. Poll
    /// failures never end the run.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), AgentError> {
        let provider = self.cycle.provider.clone();

        let orphans = self
            .cycle
            .store
            .close_orphaned_sessions(&provider, Utc::now())
            .await
            .map_err(|source| AgentError::Bootstrap {
                provider: provider.clone(),
                source,
            })?;
        if orphans > 0 {
            info!(provider = %provider, count = orphans, "Closed orphaned sessions");
        }

        info!(
            provider = %provider,
            interval_secs = self.scheduler.interval().as_secs(),
            "Agent started"
        );
        self.scheduler.run(&mut self.cycle, &shutdown).await;
        info!(provider = %provider, "Agent stopped");
        Ok(())
    }
}

impl<F, N> std::fmt::Debug for Orchestrator<F, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.cycle.provider)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Poll Cycle
// ============================================================================

struct PollCycle<F, N> {
    provider: String,
    fetcher: F,
    normalizer: N,
    store: Arc<dyn Store>,
    policy: AuthRetryPolicy,
    sessions: SessionManager,
    tracker: ResetTracker,
    notifier: Option<Arc<dyn Notifier>>,
    switch: PollingSwitch,
    status: watch::Sender<AgentStatus>,
}

impl<F, N> PollCycle<F, N>
where
    F: UsageFetcher,
    N: Normalizer,
{
    #[instrument(skip_all, fields(provider = %self.provider))]
    async fn process(&mut self, snapshot: &Snapshot) {
        if let Err(e) = self.store.insert_snapshot(snapshot).await {
            error!(error = %e, "Failed to store snapshot");
        }

        let resets = self.tracker.process(snapshot).await;

        let values = self.normalizer.session_values(snapshot);
        let changed = self.sessions.report_poll(values).await;

        if let Some(notifier) = &self.notifier {
            for quota in &snapshot.quotas {
                let Some(utilization) = quota.utilization() else {
                    continue;
                };
                notifier
                    .check(&QuotaStatus {
                        provider: self.provider.clone(),
                        quota_key: quota.key.clone(),
                        utilization,
                        limit: quota.limit,
                        reset_occurred: resets.contains(&quota.key),
                    })
                    .await;
            }
        }

        info!(
            quotas = snapshot.quotas.len(),
            max_utilization = snapshot.max_utilization(),
            changed,
            "Poll complete"
        );
    }

    fn publish(&self, started: DateTime<Utc>, outcome: &PollOutcome) {
        let state = self.policy.state();
        let session = self.sessions.active_session().map(|s| s.id.clone());
        self.status.send_modify(|status| {
            status.polls += 1;
            status.last_poll = Some(started);
            match outcome {
                PollOutcome::Snapshot(snapshot) => {
                    status.last_success = Some(snapshot.captured_at);
                    status.last_error = None;
                }
                PollOutcome::Failed { kind, message } if *kind != ErrorKind::Cancelled => {
                    status.last_error = Some(message.clone());
                }
                PollOutcome::Failed { .. } | PollOutcome::Paused => {}
            }
            status.auth_failures = state.failure_count();
            status.paused = state.is_paused();
            status.active_session = session;
        });
    }
}

#[async_trait]
impl<F, N> Poller for PollCycle<F, N>
where
    F: UsageFetcher + 'static,
    N: Normalizer + 'static,
{
    async fn poll(&mut self, shutdown: &Shutdown) {
        if !self.switch.is_enabled() {
            debug!(provider = %self.provider, "Polling disabled; skipping");
            return;
        }

        let started = Utc::now();
        let outcome = self.policy.execute(&mut self.fetcher, shutdown).await;
        if let PollOutcome::Snapshot(snapshot) = &outcome {
            self.process(snapshot).await;
        }
        self.publish(started, &outcome);
    }

    async fn on_shutdown(&mut self) {
        self.sessions.close().await;
        self.status.send_modify(|status| status.active_session = None);
    }
}

// ============================================================================
// Tests
// ============================================================================
