//! End-to-end tests of the poll pipeline on a paused clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotawatch_agent::{
    AgentError, KeyedNormalizer, Notifier, Orchestrator, OrchestratorConfig, QuotaStatus,
    shutdown,
};
use quotawatch_core::{QuotaReading, ResetCycle, SessionRecord, Snapshot, UsageVector};
use quotawatch_fetch::{CredentialRefresher, FetchError, UsageFetcher};
use quotawatch_store::{MemoryStore, Store, StoreError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, timeout};

const INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Test Doubles
// ============================================================================

enum Step {
    Values(Vec<f64>),
    Hang,
}

/// Plays back queued steps; once the queue is empty the last values repeat.
struct ScriptedFetcher {
    steps: Arc<Mutex<VecDeque<Step>>>,
    last: Mutex<Vec<f64>>,
    attempts: Arc<AtomicUsize>,
    accepted: Option<&'static str>,
    token: Option<String>,
}

impl ScriptedFetcher {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            last: Mutex::new(vec![0.0]),
            attempts: Arc::new(AtomicUsize::new(0)),
            accepted: None,
            token: None,
        }
    }

    fn values(values: &[&[f64]]) -> Self {
        Self::new(values.iter().map(|v| Step::Values(v.to_vec())).collect())
    }

    fn requiring(mut self, token: &'static str) -> Self {
        self.accepted = Some(token);
        self
    }
}

#[async_trait]
impl UsageFetcher for ScriptedFetcher {
    fn provider(&self) -> &str {
        "zai"
    }

    async fn fetch_usage(&self) -> Result<Snapshot, FetchError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(accepted) = self.accepted {
            if self.token.as_deref() != Some(accepted) {
                return Err(FetchError::Unauthorized("token rejected".into()));
            }
        }

        let step = self.steps.lock().unwrap().pop_front();
        if matches!(step, Some(Step::Hang)) {
            std::future::pending::<()>().await;
        }
        let values = {
            let mut last = self.last.lock().unwrap();
            if let Some(Step::Values(values)) = step {
                *last = values;
            }
            last.clone()
        };

        let keys = ["requests", "tokens"];
        let quotas = values
            .iter()
            .zip(keys)
            .map(|(used, key)| QuotaReading::new(key, *used).with_limit(100.0))
            .collect();
        Ok(Snapshot::new("zai", quotas))
    }

    fn apply_credential(&mut self, credential: &str) {
        self.token = Some(credential.to_string());
    }
}

#[derive(Default)]
struct SharedSource(Mutex<Option<String>>);

impl SharedSource {
    fn set(&self, value: &str) {
        *self.0.lock().unwrap() = Some(value.to_string());
    }
}

#[async_trait]
impl CredentialRefresher for SharedSource {
    fn describe(&self) -> String {
        "shared".into()
    }

    async fn refresh(&self) -> Option<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct CountingNotifier(Mutex<Vec<QuotaStatus>>);

#[async_trait]
impl Notifier for CountingNotifier {
    async fn check(&self, status: &QuotaStatus) {
        self.0.lock().unwrap().push(status.clone());
    }
}

/// Wraps a [`MemoryStore`], counting closes and optionally failing.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_bootstrap: AtomicBool,
    closes: AtomicUsize,
}

impl FlakyStore {
    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Task("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.insert_snapshot(snapshot).await
    }

    async fn latest_snapshot(&self, provider: &str) -> Result<Option<Snapshot>, StoreError> {
        self.inner.latest_snapshot(provider).await
    }

    async fn create_session(
        &self,
        id: &str,
        provider: &str,
        started_at: DateTime<Utc>,
        start_values: &UsageVector,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .create_session(id, provider, started_at, start_values)
            .await
    }

    async fn close_session(&self, id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.close_session(id, ended_at).await
    }

    async fn increment_snapshot_count(&self, id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.increment_snapshot_count(id).await
    }

    async fn update_session_max(&self, id: &str, values: &UsageVector) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_session_max(id, values).await
    }

    async fn close_orphaned_sessions(
        &self,
        provider: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if self.fail_bootstrap.load(Ordering::SeqCst) {
            return Err(StoreError::Task("database locked".into()));
        }
        self.inner.close_orphaned_sessions(provider, ended_at).await
    }

    async fn active_session(&self, provider: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.active_session(provider).await
    }

    async fn session_history(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        self.inner.session_history(provider, limit).await
    }

    async fn create_cycle(&self, cycle: &ResetCycle) -> Result<(), StoreError> {
        self.check()?;
        self.inner.create_cycle(cycle).await
    }

    async fn update_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .update_cycle(provider, quota_key, peak, total_delta)
            .await
    }

    async fn close_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        cycle_end: DateTime<Utc>,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .close_cycle(provider, quota_key, cycle_end, peak, total_delta)
            .await
    }

    async fn active_cycle(
        &self,
        provider: &str,
        quota_key: &str,
    ) -> Result<Option<ResetCycle>, StoreError> {
        self.inner.active_cycle(provider, quota_key).await
    }
}

fn orchestrator(
    fetcher: ScriptedFetcher,
    store: Arc<dyn Store>,
) -> Orchestrator<ScriptedFetcher, KeyedNormalizer> {
    Orchestrator::new(
        fetcher,
        KeyedNormalizer::new(["requests", "tokens"]),
        store,
        OrchestratorConfig::new(INTERVAL),
    )
    .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_poll_is_baseline_only() {
    let store = MemoryStore::new();
    let fetcher = ScriptedFetcher::values(&[&[5.0, 1.0]]);
    let attempts = fetcher.attempts.clone();
    let agent = orchestrator(fetcher, Arc::new(store.clone()));

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));
    sleep(Duration::from_millis(250)).await;
    trigger.trigger();
    handle.await.unwrap().unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.snapshot_count().await, 3);
    assert!(store.session_history(None, 10).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_change_opens_session_and_shutdown_closes_it() {
    let store = MemoryStore::new();
    let fetcher = ScriptedFetcher::values(&[&[1.0, 10.0], &[2.0, 10.0]]);
    let agent = orchestrator(fetcher, Arc::new(store.clone()));
    let status = agent.status();

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));
    sleep(Duration::from_millis(250)).await;

    let open = status.borrow().active_session.clone();
    assert!(open.is_some());
    assert_eq!(status.borrow().polls, 3);

    trigger.trigger();
    handle.await.unwrap().unwrap();

    let history = store.session_history(Some("zai"), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let session = &history[0];
    assert_eq!(Some(session.id.clone()), open);
    assert!(!session.is_open());
    assert_eq!(session.start_values, UsageVector::from([1.0, 10.0]));
    assert_eq!(session.max_values, UsageVector::from([2.0, 10.0]));
    // The opening poll plus one quiet poll inside the idle window.
    assert_eq!(session.snapshot_count, 2);
    assert!(status.borrow().active_session.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_hanging_fetch_closes_session_once() {
    let store = Arc::new(FlakyStore::default());
    let fetcher = ScriptedFetcher::new(vec![
        Step::Values(vec![1.0]),
        Step::Values(vec![2.0]),
        Step::Hang,
    ]);
    let agent = orchestrator(fetcher, store.clone());

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));
    sleep(Duration::from_millis(250)).await;
    trigger.trigger();

    timeout(Duration::from_secs(1), handle)
        .await
        .expect("run did not return after shutdown")
        .unwrap()
        .unwrap();

    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    let history = store.inner.session_history(None, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].is_open());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_pauses_then_resumes_on_new_credential() {
    let store = MemoryStore::new();
    let source = Arc::new(SharedSource::default());
    source.set("revoked");
    let fetcher = ScriptedFetcher::values(&[&[1.0]]).requiring("fresh");
    let attempts = fetcher.attempts.clone();
    let agent = orchestrator(fetcher, Arc::new(store.clone())).with_refresher(source.clone());
    let status = agent.status();

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));

    // Polls at 0/100/200 each fail twice; 300 and 400 are skipped.
    sleep(Duration::from_millis(450)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    assert!(status.borrow().paused);
    assert_eq!(status.borrow().auth_failures, 3);
    assert_eq!(status.borrow().polls, 5);

    source.set("fresh");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 7);
    assert!(!status.borrow().paused);
    assert!(status.borrow().last_success.is_some());
    assert!(status.borrow().last_error.is_none());

    trigger.trigger();
    handle.await.unwrap().unwrap();
    assert_eq!(store.snapshot_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failures_do_not_stop_pipeline() {
    let store = Arc::new(FlakyStore::default());
    store.fail_writes.store(true, Ordering::SeqCst);
    let notifier = Arc::new(CountingNotifier::default());
    let fetcher = ScriptedFetcher::values(&[&[10.0, 20.0], &[30.0, 20.0]]);
    let agent = orchestrator(fetcher, store.clone()).with_notifier(notifier.clone());
    let status = agent.status();

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));
    sleep(Duration::from_millis(150)).await;

    // The session opened in memory even though nothing was persisted.
    assert!(status.borrow().active_session.is_some());
    let seen = notifier.0.lock().unwrap().clone();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[2].quota_key, "requests");
    assert!((seen[2].utilization - 30.0).abs() < f64::EPSILON);
    assert_eq!(seen[2].limit, Some(100.0));

    trigger.trigger();
    handle.await.unwrap().unwrap();
    assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    assert!(store.inner.session_history(None, 10).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_is_returned() {
    let store = Arc::new(FlakyStore::default());
    store.fail_bootstrap.store(true, Ordering::SeqCst);
    let fetcher = ScriptedFetcher::values(&[&[1.0]]);
    let attempts = fetcher.attempts.clone();
    let agent = orchestrator(fetcher, store.clone());

    let (_trigger, signal) = shutdown::channel();
    let err = agent.run(signal).await.unwrap_err();

    assert!(matches!(err, AgentError::Bootstrap { ref provider, .. } if provider == "zai"));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_orphaned_sessions_closed_before_polling() {
    let store = MemoryStore::new();
    store
        .create_session("crashed", "zai", Utc::now(), &UsageVector::from([1.0]))
        .await
        .unwrap();
    let agent = orchestrator(ScriptedFetcher::values(&[&[1.0]]), Arc::new(store.clone()));

    let (trigger, signal) = shutdown::channel();
    trigger.trigger();
    agent.run(signal).await.unwrap();

    assert!(!store.session("crashed").await.unwrap().is_open());
}

#[tokio::test(start_paused = true)]
async fn test_polling_switch_skips_cycles() {
    let store = MemoryStore::new();
    let fetcher = ScriptedFetcher::values(&[&[1.0]]);
    let attempts = fetcher.attempts.clone();
    let agent = orchestrator(fetcher, Arc::new(store.clone()));
    let switch = agent.polling_switch();
    switch.set_enabled(false);

    let (trigger, signal) = shutdown::channel();
    let handle = tokio::spawn(agent.run(signal));
    sleep(Duration::from_millis(250)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 0);

    switch.set_enabled(true);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    trigger.trigger();
    handle.await.unwrap().unwrap();
}

#[test]
fn test_zero_interval_rejected() {
    let result = Orchestrator::new(
        ScriptedFetcher::values(&[&[1.0]]),
        KeyedNormalizer::new(["requests"]),
        Arc::new(MemoryStore::new()),
        OrchestratorConfig::new(Duration::ZERO),
    );
    assert!(matches!(result, Err(AgentError::Config(_))));
}
