//! Usage-related types.
//!
//! This module contains types related to usage tracking:
//! - [`UsageVector`] - Ordered values compared between polls
//! - [`QuotaReading`] - One normalized quota measurement
//! - [`Snapshot`] - One successful fetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ============================================================================
// Usage Vector
// ============================================================================

/// An ordered sequence of usage values from one poll.
///
/// Order and length are significant: two vectors of different length are
/// always considered different, whatever their contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageVector(Vec<f64>);

impl UsageVector {
    /// Creates a vector from raw values.
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Number of dimensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the vector has no dimensions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at a dimension, if present.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    /// Returns the raw values.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Returns true if `other` differs in length or in any element.
    #[allow(clippy::float_cmp)]
    pub fn differs_from(&self, other: &UsageVector) -> bool {
        if self.0.len() != other.0.len() {
            return true;
        }
        self.0.iter().zip(&other.0).any(|(a, b)| a != b)
    }

    /// Raises each dimension to the matching value in `other`.
    ///
    /// Dimensions present only in `other` are appended; dimensions missing
    /// from `other` keep their current value.
    pub fn raise_to(&mut self, other: &UsageVector) {
        for (i, value) in other.0.iter().enumerate() {
            match self.0.get_mut(i) {
                Some(current) => *current = current.max(*value),
                None => self.0.push(*value),
            }
        }
    }
}

impl From<Vec<f64>> for UsageVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl<const N: usize> From<[f64; N]> for UsageVector {
    fn from(values: [f64; N]) -> Self {
        Self(values.to_vec())
    }
}

// ============================================================================
// Quota Reading
// ============================================================================

/// One normalized quota measurement.
///
/// Percentage-only quotas are expressed with `limit = Some(100.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaReading {
    /// Stable quota key (e.g., "five_hour", "search").
    pub key: String,
    /// Amount consumed.
    pub used: f64,
    /// Amount available in the current window, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    /// When the current window resets, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaReading {
    /// Creates a reading without limit or reset time.
    pub fn new(key: impl Into<String>, used: f64) -> Self {
        Self {
            key: key.into(),
            used,
            limit: None,
            resets_at: None,
        }
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the reset time.
    #[must_use]
    pub fn with_resets_at(mut self, resets_at: DateTime<Utc>) -> Self {
        self.resets_at = Some(resets_at);
        self
    }

    /// Percentage of the limit consumed, when a positive limit is known.
    pub fn utilization(&self) -> Option<f64> {
        match self.limit {
            Some(limit) if limit > 0.0 => Some(self.used / limit * 100.0),
            _ => None,
        }
    }

    /// Rejects non-finite or negative values.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidData` naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.used.is_finite() || self.used < 0.0 {
            return Err(CoreError::InvalidData(format!(
                "{}: used must be a non-negative number, got {}",
                self.key, self.used
            )));
        }
        if let Some(limit) = self.limit {
            if !limit.is_finite() || limit < 0.0 {
                return Err(CoreError::InvalidData(format!(
                    "{}: limit must be a non-negative number, got {limit}",
                    self.key
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable record of one successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Provider instance name.
    pub provider: String,
    /// When the data was captured.
    pub captured_at: DateTime<Utc>,
    /// Normalized quota readings, in provider order.
    pub quotas: Vec<QuotaReading>,
}

impl Snapshot {
    /// Creates a snapshot captured now.
    pub fn new(provider: impl Into<String>, quotas: Vec<QuotaReading>) -> Self {
        Self::captured_at(provider, Utc::now(), quotas)
    }

    /// Creates a snapshot with an explicit capture time.
    pub fn captured_at(
        provider: impl Into<String>,
        captured_at: DateTime<Utc>,
        quotas: Vec<QuotaReading>,
    ) -> Self {
        Self {
            provider: provider.into(),
            captured_at,
            quotas,
        }
    }

    /// Looks up a reading by key.
    pub fn quota(&self, key: &str) -> Option<&QuotaReading> {
        self.quotas.iter().find(|q| q.key == key)
    }

    /// Highest utilization across all readings with a known limit.
    pub fn max_utilization(&self) -> f64 {
        self.quotas
            .iter()
            .filter_map(QuotaReading::utilization)
            .fold(0.0_f64, f64::max)
    }

    /// Validates every reading.
    ///
    /// # Errors
    ///
    /// Returns the first reading error, prefixed with the provider name.
    pub fn validate(&self) -> Result<(), CoreError> {
        for quota in &self.quotas {
            quota
                .validate()
                .map_err(|e| CoreError::InvalidData(format!("{}: {e}", self.provider)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
