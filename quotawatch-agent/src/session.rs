//! Usage session detection.
//!
//! Turns the stream of per-poll usage vectors into sessions: a session opens
//! on the first change after a stable baseline and closes once no change has
//! been seen for longer than the idle timeout (or on shutdown).
//!
//! The in-memory state machine is authoritative. Store writes are
//! best-effort: a failed write is logged and detection carries on, so a
//! storage outage costs durability but never a live session.

use chrono::{DateTime, Utc};
use quotawatch_core::UsageVector;
use quotawatch_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// The open session as tracked in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    /// Session identifier.
    pub id: String,
    /// When the session opened.
    pub started_at: DateTime<Utc>,
    /// Last time a usage change was seen.
    pub last_activity: DateTime<Utc>,
    /// Baseline observed before the opening change.
    pub start_values: UsageVector,
    /// Per-dimension maximum since opening.
    pub max_values: UsageVector,
    /// Polls counted toward the session.
    pub snapshot_count: u64,
}

/// Session state machine for one provider.
pub struct SessionManager {
    provider: String,
    store: Arc<dyn Store>,
    idle_timeout: chrono::Duration,
    baseline: Option<UsageVector>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    /// Creates a manager with no baseline and no session.
    pub fn new(provider: impl Into<String>, store: Arc<dyn Store>, idle_timeout: Duration) -> Self {
        Self {
            provider: provider.into(),
            store,
            idle_timeout: chrono::Duration::from_std(idle_timeout)
                .unwrap_or(chrono::Duration::MAX),
            baseline: None,
            active: None,
        }
    }

    /// The open session, if any.
    pub fn active_session(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// Feeds one poll's values; returns true if usage changed.
    pub async fn report_poll(&mut self, values: UsageVector) -> bool {
        self.report_poll_at(values, Utc::now()).await
    }

    /// [`SessionManager::report_poll`] with an explicit clock reading.
    pub async fn report_poll_at(&mut self, values: UsageVector, now: DateTime<Utc>) -> bool {
        let Some(previous) = self.baseline.replace(values.clone()) else {
            return false;
        };

        if values.differs_from(&previous) {
            if self.active.is_some() {
                self.record_activity(&values, now).await;
            } else {
                self.open(previous, values, now).await;
            }
            return true;
        }

        let Some(ref mut session) = self.active else {
            return false;
        };
        if now - session.last_activity > self.idle_timeout {
            self.close_at(now).await;
        } else {
            session.snapshot_count += 1;
            let id = session.id.clone();
            if let Err(e) = self.store.increment_snapshot_count(&id).await {
                error!(provider = %self.provider, session_id = %id, error = %e, "Failed to increment snapshot count");
            }
        }
        false
    }

    /// Closes the open session now. No-op without one.
    pub async fn close(&mut self) {
        self.close_at(Utc::now()).await;
    }

    async fn open(&mut self, start_values: UsageVector, values: UsageVector, now: DateTime<Utc>) {
        let id = uuid::Uuid::new_v4().to_string();

        match self
            .store
            .create_session(&id, &self.provider, now, &start_values)
            .await
        {
            Ok(()) => info!(provider = %self.provider, session_id = %id, "Usage session started"),
            Err(e) => {
                error!(provider = %self.provider, session_id = %id, error = %e, "Failed to create session");
            }
        }

        self.active = Some(ActiveSession {
            id: id.clone(),
            started_at: now,
            last_activity: now,
            start_values,
            max_values: values.clone(),
            snapshot_count: 1,
        });
        self.persist_activity(&id, &values).await;
    }

    async fn record_activity(&mut self, values: &UsageVector, now: DateTime<Utc>) {
        let Some(ref mut session) = self.active else {
            return;
        };
        session.last_activity = now;
        session.max_values.raise_to(values);
        session.snapshot_count += 1;
        let id = session.id.clone();
        self.persist_activity(&id, values).await;
    }

    async fn persist_activity(&self, id: &str, values: &UsageVector) {
        if let Err(e) = self.store.increment_snapshot_count(id).await {
            error!(provider = %self.provider, session_id = %id, error = %e, "Failed to increment snapshot count");
        }
        if let Err(e) = self.store.update_session_max(id, values).await {
            error!(provider = %self.provider, session_id = %id, error = %e, "Failed to update session max");
        }
    }

    async fn close_at(&mut self, now: DateTime<Utc>) {
        let Some(session) = self.active.take() else {
            return;
        };
        match self.store.close_session(&session.id, now).await {
            Ok(()) => info!(
                provider = %self.provider,
                session_id = %session.id,
                snapshots = session.snapshot_count,
                "Usage session ended"
            ),
            Err(e) => {
                error!(provider = %self.provider, session_id = %session.id, error = %e, "Failed to close session");
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("provider", &self.provider)
            .field("idle_timeout", &self.idle_timeout)
            .field("baseline", &self.baseline)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quotawatch_store::MemoryStore;

    fn manager(store: &MemoryStore) -> SessionManager {
        SessionManager::new("zai", Arc::new(store.clone()), DEFAULT_IDLE_TIMEOUT)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_770_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_first_poll_is_baseline() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        assert!(!sm.report_poll_at(UsageVector::from([5.0, 1.0]), t(0)).await);
        assert!(sm.active_session().is_none());
        assert!(store.active_session("zai").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_opens_session_with_previous_baseline() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0, 2.0]), t(0)).await;
        assert!(sm.report_poll_at(UsageVector::from([1.0, 3.0]), t(60)).await);

        let session = sm.active_session().unwrap();
        assert_eq!(session.start_values, UsageVector::from([1.0, 2.0]));
        assert_eq!(session.max_values, UsageVector::from([1.0, 3.0]));
        assert_eq!(session.snapshot_count, 1);
        assert_eq!(session.started_at, t(60));

        let stored = store.active_session("zai").await.unwrap().unwrap();
        assert_eq!(stored.id, session.id);
        assert_eq!(stored.start_values, UsageVector::from([1.0, 2.0]));
        assert_eq!(stored.snapshot_count, 1);
    }

    #[tokio::test]
    async fn test_length_change_is_a_change() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0, 2.0]), t(0)).await;
        assert!(sm.report_poll_at(UsageVector::from([1.0, 2.0, 0.0]), t(60)).await);
        assert!(sm.active_session().is_some());
    }

    #[tokio::test]
    async fn test_unchanged_without_session_is_noop() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0]), t(0)).await;
        assert!(!sm.report_poll_at(UsageVector::from([1.0]), t(60)).await);
        assert!(sm.active_session().is_none());
        assert!(store.session_history(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_poll_inside_window_counts_without_moving_activity() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0]), t(0)).await;
        sm.report_poll_at(UsageVector::from([2.0]), t(60)).await;
        assert!(!sm.report_poll_at(UsageVector::from([2.0]), t(120)).await);

        let session = sm.active_session().unwrap();
        assert_eq!(session.snapshot_count, 2);
        assert_eq!(session.last_activity, t(60));
        assert_eq!(session.max_values, UsageVector::from([2.0]));
        let stored = store.session(&session.id).await.unwrap();
        assert_eq!(stored.snapshot_count, 2);
    }

    #[tokio::test]
    async fn test_idle_boundary_is_exclusive() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0]), t(0)).await;
        sm.report_poll_at(UsageVector::from([2.0]), t(100)).await;

        // Exactly the timeout: still open.
        sm.report_poll_at(UsageVector::from([2.0]), t(700)).await;
        assert!(sm.active_session().is_some());

        // One second past: closed at the poll time.
        sm.report_poll_at(UsageVector::from([2.0]), t(701)).await;
        assert!(sm.active_session().is_none());

        let history = store.session_history(Some("zai"), 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ended_at, Some(t(701)));
        assert_eq!(history[0].snapshot_count, 2);
    }

    #[tokio::test]
    async fn test_change_after_idle_close_opens_new_session() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([1.0]), t(0)).await;
        sm.report_poll_at(UsageVector::from([2.0]), t(60)).await;
        let first = sm.active_session().unwrap().id.clone();
        sm.report_poll_at(UsageVector::from([2.0]), t(2000)).await;
        assert!(sm.report_poll_at(UsageVector::from([3.0]), t(2060)).await);

        let second = sm.active_session().unwrap();
        assert_ne!(second.id, first);
        assert_eq!(second.start_values, UsageVector::from([2.0]));
    }

    #[tokio::test]
    async fn test_max_tracking() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.report_poll_at(UsageVector::from([100.0, 50.0, 500.0]), t(0)).await;
        sm.report_poll_at(UsageVector::from([200.0, 60.0, 600.0]), t(60)).await;
        sm.report_poll_at(UsageVector::from([150.0, 100.0, 700.0]), t(120)).await;

        let session = sm.active_session().unwrap();
        assert_eq!(session.start_values, UsageVector::from([100.0, 50.0, 500.0]));
        assert_eq!(session.max_values, UsageVector::from([200.0, 100.0, 700.0]));
        assert_eq!(session.snapshot_count, 2);

        let stored = store.session(&session.id).await.unwrap();
        assert_eq!(stored.max_values, UsageVector::from([200.0, 100.0, 700.0]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = MemoryStore::new();
        let mut sm = manager(&store);

        sm.close().await;
        sm.report_poll_at(UsageVector::from([1.0]), t(0)).await;
        sm.report_poll_at(UsageVector::from([2.0]), t(60)).await;
        sm.close().await;
        sm.close().await;

        assert!(sm.active_session().is_none());
        let history = store.session_history(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_open());
    }
}
