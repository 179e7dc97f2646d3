//! JSON output formatting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use quotawatch_core::{QuotaReading, SessionRecord, Snapshot};
use serde::Serialize;

// ============================================================================
// Output Types
// ============================================================================

/// JSON output for one provider check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutput {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quotas: Vec<QuotaOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_values: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single quota reading.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaOutput {
    pub key: String,
    pub used: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utilization: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

impl From<&QuotaReading> for QuotaOutput {
    fn from(quota: &QuotaReading) -> Self {
        Self {
            key: quota.key.clone(),
            used: quota.used,
            limit: quota.limit,
            utilization: quota.utilization(),
            resets_at: quota.resets_at,
        }
    }
}

impl ProviderOutput {
    /// Output for a successful fetch.
    pub fn snapshot(snapshot: &Snapshot, session_values: Vec<f64>) -> Self {
        Self {
            provider: snapshot.provider.clone(),
            captured_at: Some(snapshot.captured_at),
            quotas: snapshot.quotas.iter().map(QuotaOutput::from).collect(),
            session_values: Some(session_values),
            error: None,
        }
    }

    /// Output for a failed fetch.
    pub fn error(provider: &str, error: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            captured_at: None,
            quotas: Vec::new(),
            session_values: None,
            error: Some(error.into()),
        }
    }
}

/// A usage session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutput {
    pub id: String,
    pub provider: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub duration_secs: i64,
    pub snapshot_count: u64,
    pub start_values: Vec<f64>,
    pub max_values: Vec<f64>,
}

impl SessionOutput {
    /// Builds the output, measuring open sessions up to `now`.
    pub fn new(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            provider: record.provider.clone(),
            started_at: record.started_at,
            ended_at: record.ended_at,
            active: record.is_open(),
            duration_secs: record.duration(now).num_seconds(),
            snapshot_count: record.snapshot_count,
            start_values: record.start_values.as_slice().to_vec(),
            max_values: record.max_values.as_slice().to_vec(),
        }
    }
}

// ============================================================================
// Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotawatch_core::UsageVector;

    #[test]
    fn test_format_pretty() {
        let formatter = JsonFormatter::new(true);
        let output = formatter.format(&serde_json::json!({"key": "value"})).unwrap();
        assert!(output.contains('\n'));
    }

    #[test]
    fn test_format_compact() {
        let formatter = JsonFormatter::new(false);
        let output = formatter.format(&serde_json::json!({"key": "value"})).unwrap();
        assert!(!output.contains('\n'));
    }

    #[test]
    fn test_provider_output_fields() {
        let snapshot = Snapshot::new(
            "zai",
            vec![QuotaReading::new("tokens", 25.0).with_limit(100.0)],
        );
        let output = ProviderOutput::snapshot(&snapshot, vec![25.0]);
        let value = serde_json::to_value(&output).unwrap();

        assert_eq!(value["provider"], "zai");
        assert_eq!(value["quotas"][0]["utilization"], 25.0);
        assert_eq!(value["sessionValues"][0], 25.0);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_output_omits_quotas() {
        let value = serde_json::to_value(ProviderOutput::error("zai", "boom")).unwrap();
        assert_eq!(value["error"], "boom");
        assert!(value.get("quotas").is_none());
    }

    #[test]
    fn test_session_output_open_duration() {
        let started = Utc::now() - chrono::Duration::minutes(5);
        let record = SessionRecord {
            id: "s1".into(),
            provider: "zai".into(),
            started_at: started,
            ended_at: None,
            start_values: UsageVector::from([1.0]),
            max_values: UsageVector::from([3.0]),
            snapshot_count: 4,
        };
        let output = SessionOutput::new(&record, started + chrono::Duration::minutes(5));
        assert!(output.active);
        assert_eq!(output.duration_secs, 300);
        assert_eq!(output.max_values, vec![3.0]);
    }
}
