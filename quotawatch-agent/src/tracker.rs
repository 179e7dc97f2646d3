//! Quota reset-cycle tracking.
//!
//! Follows every quota that reports a reset time and splits its history into
//! cycles. A reset is detected when either
//! - the capture time is more than [`RESET_GRACE_SECS`] past the cycle's
//!   reset time, or
//! - the reported reset time moved to a different hour.
//!
//! Within a cycle, positive deltas accumulate and the peak is tracked.

use chrono::{DateTime, Duration, Utc};
use quotawatch_core::{QuotaReading, ResetCycle, Snapshot};
use quotawatch_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Grace period (seconds) after a reported reset time before a reset is assumed.
pub const RESET_GRACE_SECS: i64 = 120;

#[derive(Debug, Clone)]
struct Tracked {
    cycle: ResetCycle,
    last_used: Option<f64>,
}

/// Reset-cycle tracker for one provider.
pub struct ResetTracker {
    provider: String,
    store: Arc<dyn Store>,
    tracked: HashMap<String, Tracked>,
}

impl ResetTracker {
    /// Creates a tracker with no cycles loaded.
    pub fn new(provider: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            provider: provider.into(),
            store,
            tracked: HashMap::new(),
        }
    }

    /// The in-memory cycle of a quota.
    pub fn cycle(&self, quota_key: &str) -> Option<&ResetCycle> {
        self.tracked.get(quota_key).map(|t| &t.cycle)
    }

    /// Processes a snapshot; returns the keys of quotas that reset.
    pub async fn process(&mut self, snapshot: &Snapshot) -> Vec<String> {
        let mut resets = Vec::new();
        for quota in &snapshot.quotas {
            let Some(resets_at) = quota.resets_at else {
                continue;
            };
            if self.process_quota(quota, resets_at, snapshot.captured_at).await {
                resets.push(quota.key.clone());
            }
        }
        resets
    }

    async fn process_quota(
        &mut self,
        quota: &QuotaReading,
        resets_at: DateTime<Utc>,
        captured_at: DateTime<Utc>,
    ) -> bool {
        if !self.tracked.contains_key(&quota.key) {
            match self.load_active(&quota.key).await {
                Some(cycle) => {
                    debug!(provider = %self.provider, quota = %quota.key, "Resumed stored cycle");
                    self.tracked.insert(
                        quota.key.clone(),
                        Tracked {
                            cycle,
                            last_used: None,
                        },
                    );
                }
                None => {
                    self.open(quota, resets_at, captured_at).await;
                    return false;
                }
            }
        }

        let Some(tracked) = self.tracked.get_mut(&quota.key) else {
            return false;
        };
        if let Some(last) = tracked.last_used {
            let delta = quota.used - last;
            if delta > 0.0 {
                tracked.cycle.total_delta += delta;
            }
        }

        // The reset reading belongs to the next window, so it never raises the
        // closing cycle's peak.
        if let Some(reason) = reset_reason(tracked.cycle.resets_at, resets_at, captured_at) {
            let previous = tracked.cycle.clone();
            let cycle_end = previous
                .resets_at
                .map_or(captured_at, |old| old.min(captured_at));
            info!(
                provider = %self.provider,
                quota = %quota.key,
                reason,
                peak = previous.peak,
                total_delta = previous.total_delta,
                "Quota reset detected"
            );
            if let Err(e) = self
                .store
                .close_cycle(
                    &self.provider,
                    &quota.key,
                    cycle_end,
                    previous.peak,
                    previous.total_delta,
                )
                .await
            {
                error!(provider = %self.provider, quota = %quota.key, error = %e, "Failed to close cycle");
            }
            self.open(quota, resets_at, captured_at).await;
            return true;
        }

        tracked.cycle.peak = tracked.cycle.peak.max(quota.used);
        tracked.last_used = Some(quota.used);
        let (peak, total_delta) = (tracked.cycle.peak, tracked.cycle.total_delta);
        if let Err(e) = self
            .store
            .update_cycle(&self.provider, &quota.key, peak, total_delta)
            .await
        {
            error!(provider = %self.provider, quota = %quota.key, error = %e, "Failed to update cycle");
        }
        false
    }

    async fn load_active(&self, quota_key: &str) -> Option<ResetCycle> {
        match self.store.active_cycle(&self.provider, quota_key).await {
            Ok(cycle) => cycle,
            Err(e) => {
                error!(provider = %self.provider, quota = %quota_key, error = %e, "Failed to load active cycle");
                None
            }
        }
    }

    async fn open(&mut self, quota: &QuotaReading, resets_at: DateTime<Utc>, now: DateTime<Utc>) {
        let cycle = ResetCycle {
            provider: self.provider.clone(),
            quota_key: quota.key.clone(),
            cycle_start: now,
            cycle_end: None,
            resets_at: Some(resets_at),
            peak: quota.used,
            total_delta: 0.0,
        };
        if let Err(e) = self.store.create_cycle(&cycle).await {
            error!(provider = %self.provider, quota = %quota.key, error = %e, "Failed to create cycle");
        }
        debug!(provider = %self.provider, quota = %quota.key, %resets_at, "Opened cycle");
        self.tracked.insert(
            quota.key.clone(),
            Tracked {
                cycle,
                last_used: Some(quota.used),
            },
        );
    }
}

impl std::fmt::Debug for ResetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTracker")
            .field("provider", &self.provider)
            .field("tracked", &self.tracked.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn hour(dt: DateTime<Utc>) -> i64 {
    dt.timestamp().div_euclid(3600)
}

fn reset_reason(
    stored: Option<DateTime<Utc>>,
    reported: DateTime<Utc>,
    captured_at: DateTime<Utc>,
) -> Option<&'static str> {
    let Some(stored) = stored else {
        return Some("reset time appeared");
    };
    if captured_at > stored + Duration::seconds(RESET_GRACE_SECS) {
        return Some("reset time passed");
    }
    if hour(stored) != hour(reported) {
        return Some("reset time changed");
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
