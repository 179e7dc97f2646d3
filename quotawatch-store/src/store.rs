//! The persistence capability used by the poll loop.
//!
//! Every method is a single, self-contained write or read. Callers treat
//! failures as local to one poll cycle: the in-memory session and tracker
//! state advance regardless of whether the write landed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotawatch_core::{ResetCycle, SessionRecord, Snapshot, UsageVector};

use crate::error::StoreError;

/// Durable record store for snapshots, sessions and reset cycles.
#[async_trait]
pub trait Store: Send + Sync {
    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Persists a snapshot and returns its row id.
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64, StoreError>;

    /// Most recent snapshot for a provider.
    async fn latest_snapshot(&self, provider: &str) -> Result<Option<Snapshot>, StoreError>;

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Opens a session with zero counted snapshots and empty maxima.
    async fn create_session(
        &self,
        id: &str,
        provider: &str,
        started_at: DateTime<Utc>,
        start_values: &UsageVector,
    ) -> Result<(), StoreError>;

    /// Sets the end time of a session.
    async fn close_session(&self, id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Adds one to the session's snapshot count.
    async fn increment_snapshot_count(&self, id: &str) -> Result<(), StoreError>;

    /// Raises the stored per-dimension maxima to at least `values`.
    async fn update_session_max(&self, id: &str, values: &UsageVector) -> Result<(), StoreError>;

    /// Closes every open session of `provider` at `ended_at`; returns how many.
    async fn close_orphaned_sessions(
        &self,
        provider: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// The open session of a provider, if any.
    async fn active_session(&self, provider: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Sessions newest first, optionally filtered by provider.
    async fn session_history(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError>;

    // ========================================================================
    // Reset Cycles
    // ========================================================================

    /// Opens a cycle.
    async fn create_cycle(&self, cycle: &ResetCycle) -> Result<(), StoreError>;

    /// Updates peak and delta of the active cycle.
    async fn update_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError>;

    /// Closes the active cycle.
    async fn close_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        cycle_end: DateTime<Utc>,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError>;

    /// The active cycle of a quota, if any.
    async fn active_cycle(
        &self,
        provider: &str,
        quota_key: &str,
    ) -> Result<Option<ResetCycle>, StoreError>;
}
