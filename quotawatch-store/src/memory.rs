//! Process-local store.
//!
//! Keeps every record in memory behind a `tokio` `RwLock`. Used by tests and
//! by `quotawatch check`, which must not touch the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotawatch_core::{ResetCycle, SessionRecord, Snapshot, UsageVector};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::Store;

#[derive(Debug, Default)]
struct Inner {
    snapshots: Vec<Snapshot>,
    sessions: Vec<SessionRecord>,
    cycles: Vec<ResetCycle>,
}

impl Inner {
    fn session_mut(&mut self, id: &str) -> Result<&mut SessionRecord, StoreError> {
        self.sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
    }

    fn open_cycle_mut(
        &mut self,
        provider: &str,
        quota_key: &str,
    ) -> Result<&mut ResetCycle, StoreError> {
        self.cycles
            .iter_mut()
            .rev()
            .find(|c| c.provider == provider && c.quota_key == quota_key && c.cycle_end.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("active cycle {provider}/{quota_key}")))
    }
}

/// In-memory [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots stored.
    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.snapshots.len()
    }

    /// A session by id.
    pub async fn session(&self, id: &str) -> Option<SessionRecord> {
        self.inner
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    /// Every cycle recorded for a quota, oldest first.
    pub async fn cycles(&self, provider: &str, quota_key: &str) -> Vec<ResetCycle> {
        self.inner
            .read()
            .await
            .cycles
            .iter()
            .filter(|c| c.provider == provider && c.quota_key == quota_key)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.snapshots.push(snapshot.clone());
        i64::try_from(inner.snapshots.len()).map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn latest_snapshot(&self, provider: &str) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.provider == provider)
            .max_by_key(|s| s.captured_at)
            .cloned())
    }

    async fn create_session(
        &self,
        id: &str,
        provider: &str,
        started_at: DateTime<Utc>,
        start_values: &UsageVector,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.sessions.iter().any(|s| s.id == id) {
            return Err(StoreError::Config(format!("session {id} already exists")));
        }
        inner.sessions.push(SessionRecord {
            id: id.to_string(),
            provider: provider.to_string(),
            started_at,
            ended_at: None,
            start_values: start_values.clone(),
            max_values: UsageVector::default(),
            snapshot_count: 0,
        });
        Ok(())
    }

    async fn close_session(&self, id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.write().await.session_mut(id)?.ended_at = Some(ended_at);
        Ok(())
    }

    async fn increment_snapshot_count(&self, id: &str) -> Result<(), StoreError> {
        self.inner.write().await.session_mut(id)?.snapshot_count += 1;
        Ok(())
    }

    async fn update_session_max(&self, id: &str, values: &UsageVector) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .session_mut(id)?
            .max_values
            .raise_to(values);
        Ok(())
    }

    async fn close_orphaned_sessions(
        &self,
        provider: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut closed = 0;
        for session in inner
            .sessions
            .iter_mut()
            .filter(|s| s.provider == provider && s.is_open())
        {
            session.ended_at = Some(ended_at);
            closed += 1;
        }
        Ok(closed)
    }

    async fn active_session(&self, provider: &str) -> Result<Option<SessionRecord>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .iter()
            .rev()
            .find(|s| s.provider == provider && s.is_open())
            .cloned())
    }

    async fn session_history(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .iter()
            .filter(|s| provider.is_none_or(|p| s.provider == p))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn create_cycle(&self, cycle: &ResetCycle) -> Result<(), StoreError> {
        self.inner.write().await.cycles.push(cycle.clone());
        Ok(())
    }

    async fn update_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let cycle = inner.open_cycle_mut(provider, quota_key)?;
        cycle.peak = peak;
        cycle.total_delta = total_delta;
        Ok(())
    }

    async fn close_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        cycle_end: DateTime<Utc>,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let cycle = inner.open_cycle_mut(provider, quota_key)?;
        cycle.cycle_end = Some(cycle_end);
        cycle.peak = peak;
        cycle.total_delta = total_delta;
        Ok(())
    }

    async fn active_cycle(
        &self,
        provider: &str,
        quota_key: &str,
    ) -> Result<Option<ResetCycle>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .cycles
            .iter()
            .rev()
            .find(|c| c.provider == provider && c.quota_key == quota_key && c.cycle_end.is_none())
            .cloned())
    }
}

// ============================================================================
// Tests
// ============================================================================
