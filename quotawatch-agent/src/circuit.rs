//! Authentication retry policy and circuit breaker.
//!
//! Every poll first asks the credential source for the freshest credential
//! and applies it only when it changed. An auth failure forces one
//! unconditional re-read followed by exactly one retry. When the retry also
//! fails authentication, a consecutive-failure counter advances; at the
//! threshold the breaker pauses fetching altogether until the credential
//! source yields something other than the credential that failed.

use quotawatch_core::Snapshot;
use quotawatch_fetch::{CredentialRefresher, ErrorKind, FetchError, UsageFetcher};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::shutdown::Shutdown;

/// Default number of consecutive post-retry auth failures before pausing.
pub const DEFAULT_AUTH_FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// Token Gate
// ============================================================================

/// Remembers the last applied credential so unchanged ones are not re-applied.
#[derive(Default, Clone)]
pub struct TokenGate {
    applied: Option<String>,
}

impl TokenGate {
    /// Creates an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `credential` and returns true if it should be applied.
    ///
    /// Empty credentials are never applied.
    pub fn observe(&mut self, credential: &str) -> bool {
        if self.applied.as_deref() == Some(credential) {
            return false;
        }
        self.observe_forced(credential)
    }

    /// Like [`TokenGate::observe`], but applies an unchanged credential too.
    ///
    /// Only this one read is forced; later calls to `observe` compare as usual.
    pub fn observe_forced(&mut self, credential: &str) -> bool {
        if credential.is_empty() {
            return false;
        }
        self.applied = Some(credential.to_string());
        true
    }

    /// The credential last applied to the fetcher.
    pub fn current(&self) -> Option<&str> {
        self.applied.as_deref()
    }
}

impl std::fmt::Debug for TokenGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGate")
            .field("applied", &self.applied.is_some())
            .finish()
    }
}

// ============================================================================
// Circuit State
// ============================================================================

/// In-memory breaker state of one orchestrator.
#[derive(Default, Clone)]
pub struct CircuitState {
    gate: TokenGate,
    last_failed: Option<String>,
    failure_count: u32,
    paused: bool,
}

impl CircuitState {
    /// Consecutive auth failures that survived the retry.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether fetching is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn resume(&mut self) {
        self.paused = false;
        self.failure_count = 0;
        self.last_failed = None;
    }
}

impl std::fmt::Debug for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitState")
            .field("gate", &self.gate)
            .field("failure_count", &self.failure_count)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Poll Outcome
// ============================================================================

/// Result of one guarded fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The fetch succeeded (possibly on the retry).
    Snapshot(Snapshot),
    /// The breaker is open; no fetch was attempted.
    Paused,
    /// The fetch failed.
    Failed {
        /// Classification of the final error.
        kind: ErrorKind,
        /// Error text for status reporting.
        message: String,
    },
}

impl PollOutcome {
    fn failed(err: &FetchError) -> Self {
        Self::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Auth Retry Policy
// ============================================================================

/// Guards fetches with credential refresh, one auth retry and a pause breaker.
pub struct AuthRetryPolicy {
    refresher: Option<Arc<dyn CredentialRefresher>>,
    threshold: u32,
    state: CircuitState,
}

impl AuthRetryPolicy {
    /// Creates a policy without a credential source.
    ///
    /// Without a source, auth failures are logged and never retried, and the
    /// breaker never engages.
    pub fn new(threshold: u32) -> Self {
        Self {
            refresher: None,
            threshold: threshold.max(1),
            state: CircuitState::default(),
        }
    }

    /// Attaches a credential source.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Current breaker state.
    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    /// The pause threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Runs one guarded fetch.
    pub async fn execute<F>(&mut self, fetcher: &mut F, shutdown: &Shutdown) -> PollOutcome
    where
        F: UsageFetcher + ?Sized,
    {
        self.refresh(fetcher).await;

        if self.state.paused {
            return PollOutcome::Paused;
        }

        match fetch(fetcher, shutdown).await {
            Ok(snapshot) => {
                self.state.failure_count = 0;
                PollOutcome::Snapshot(snapshot)
            }
            Err(e) if e.is_auth() => self.retry_after_auth_failure(fetcher, shutdown, &e).await,
            Err(e) => failure(fetcher.provider(), &e),
        }
    }

    /// Applies a changed credential and lifts the pause if it differs from
    /// the one that failed.
    async fn refresh<F>(&mut self, fetcher: &mut F)
    where
        F: UsageFetcher + ?Sized,
    {
        let Some(refresher) = self.refresher.clone() else {
            return;
        };
        let Some(credential) = refresher.refresh().await else {
            return;
        };
        if !self.state.gate.observe(&credential) {
            return;
        }

        fetcher.apply_credential(&credential);
        info!(provider = %fetcher.provider(), source = %refresher.describe(), "Credential applied");

        if self.state.paused && self.state.last_failed.as_deref() != Some(credential.as_str()) {
            self.state.resume();
            info!(provider = %fetcher.provider(), "Credential changed; resuming polling");
        }
    }

    async fn retry_after_auth_failure<F>(
        &mut self,
        fetcher: &mut F,
        shutdown: &Shutdown,
        first: &FetchError,
    ) -> PollOutcome
    where
        F: UsageFetcher + ?Sized,
    {
        let provider = fetcher.provider().to_string();
        let Some(refresher) = self.refresher.clone() else {
            warn!(provider = %provider, error = %first, "Authentication failed; no credential source configured");
            return PollOutcome::failed(first);
        };

        warn!(provider = %provider, error = %first, "Authentication failed; re-reading credential");
        if let Some(credential) = refresher.refresh().await {
            if self.state.gate.observe_forced(&credential) {
                fetcher.apply_credential(&credential);
            }
        }

        match fetch(fetcher, shutdown).await {
            Ok(snapshot) => {
                self.state.failure_count = 0;
                info!(provider = %provider, "Fetch succeeded after credential re-read");
                PollOutcome::Snapshot(snapshot)
            }
            Err(e) if e.is_auth() => {
                self.state.failure_count += 1;
                error!(
                    provider = %provider,
                    failure_count = self.state.failure_count,
                    error = %e,
                    "Authentication retry failed"
                );
                if self.state.failure_count >= self.threshold {
                    self.state.paused = true;
                    self.state.last_failed = self.state.gate.current().map(str::to_string);
                    error!(
                        provider = %provider,
                        failure_count = self.state.failure_count,
                        "Polling paused after repeated authentication failures; action required: \
                         update the credential to resume"
                    );
                }
                PollOutcome::failed(&e)
            }
            Err(e) => failure(&provider, &e),
        }
    }
}

impl std::fmt::Debug for AuthRetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRetryPolicy")
            .field(
                "refresher",
                &self.refresher.as_ref().map(|r| r.describe()),
            )
            .field("threshold", &self.threshold)
            .field("state", &self.state)
            .finish()
    }
}

/// Fetches unless cancelled first; an in-flight fetch is dropped on cancel.
async fn fetch<F>(fetcher: &F, shutdown: &Shutdown) -> Result<Snapshot, FetchError>
where
    F: UsageFetcher + ?Sized,
{
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(FetchError::Cancelled),
        result = fetcher.fetch_usage() => result,
    }
}

fn failure(provider: &str, err: &FetchError) -> PollOutcome {
    match err.kind() {
        ErrorKind::Cancelled => debug!(provider = %provider, "Fetch cancelled"),
        ErrorKind::Fatal => error!(provider = %provider, error = %err, "Fetch failed"),
        ErrorKind::Transient | ErrorKind::Auth => {
            warn!(provider = %provider, error = %err, "Fetch failed");
        }
    }
    PollOutcome::failed(err)
}

// ============================================================================
// Tests
// ============================================================================
