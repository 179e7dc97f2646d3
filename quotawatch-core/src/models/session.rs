//! Session and reset-cycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::usage::UsageVector;

/// Persisted view of one usage session.
///
/// A session is open while `ended_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub id: String,
    /// Provider instance name.
    pub provider: String,
    /// When the first usage change was observed.
    pub started_at: DateTime<Utc>,
    /// When the session was closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Baseline values observed before the triggering change.
    pub start_values: UsageVector,
    /// Per-dimension maximum observed while open.
    pub max_values: UsageVector,
    /// Number of polls counted toward the session.
    pub snapshot_count: u64,
}

impl SessionRecord {
    /// Returns true if the session has not been closed.
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Session length, measured to `now` while still open.
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// One quota window between two detected resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetCycle {
    /// Provider instance name.
    pub provider: String,
    /// Quota key within the provider.
    pub quota_key: String,
    /// When the cycle was first observed.
    pub cycle_start: DateTime<Utc>,
    /// When the cycle ended (`None` while active).
    pub cycle_end: Option<DateTime<Utc>>,
    /// Reset time reported by the provider for this window.
    pub resets_at: Option<DateTime<Utc>>,
    /// Highest usage seen within the cycle.
    pub peak: f64,
    /// Sum of positive usage deltas within the cycle.
    pub total_delta: f64,
}
