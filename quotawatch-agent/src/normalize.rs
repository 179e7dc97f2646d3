//! Snapshot-to-session-vector normalization.

use quotawatch_core::{Snapshot, UsageVector};

/// Maps a provider snapshot onto the vector the session detector compares.
pub trait Normalizer: Send + Sync {
    /// Values for session detection, in a stable order.
    fn session_values(&self, snapshot: &Snapshot) -> UsageVector;
}

/// Picks the `used` amount of named quotas, in order.
///
/// A quota missing from the snapshot contributes 0, so the vector length
/// stays stable when a provider briefly omits a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedNormalizer {
    keys: Vec<String>,
}

impl KeyedNormalizer {
    /// Creates a normalizer over the given quota keys.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The quota keys, in vector order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Normalizer for KeyedNormalizer {
    fn session_values(&self, snapshot: &Snapshot) -> UsageVector {
        self.keys
            .iter()
            .map(|key| snapshot.quota(key).map_or(0.0, |q| q.used))
            .collect::<Vec<_>>()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotawatch_core::QuotaReading;

    #[test]
    fn test_values_follow_key_order() {
        let snapshot = Snapshot::new(
            "zai",
            vec![
                QuotaReading::new("time", 7.0),
                QuotaReading::new("tokens", 1200.0),
            ],
        );
        let normalizer = KeyedNormalizer::new(["tokens", "time", "search"]);
        assert_eq!(
            normalizer.session_values(&snapshot),
            UsageVector::from([1200.0, 7.0, 0.0])
        );
    }
}
