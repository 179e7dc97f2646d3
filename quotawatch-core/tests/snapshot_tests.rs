//! Integration tests for core snapshot types.

use chrono::{TimeZone, Utc};
use quotawatch_core::{QuotaReading, SessionRecord, Snapshot, UsageVector};

#[test]
fn test_snapshot_serialization_roundtrip() {
    let resets_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let snapshot = Snapshot::new(
        "anthropic",
        vec![QuotaReading::new("five_hour", 42.0)
            .with_limit(100.0)
            .with_resets_at(resets_at)],
    );
    let json = serde_json::to_string(&snapshot).unwrap();
    let parsed: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snapshot);
}

#[test]
fn test_usage_vector_serializes_as_plain_array() {
    let vector = UsageVector::from([1.0, 2.5]);
    assert_eq!(serde_json::to_string(&vector).unwrap(), "[1.0,2.5]");
}

#[test]
fn test_missing_limit_is_omitted_from_json() {
    let json = serde_json::to_value(QuotaReading::new("tool", 3.0)).unwrap();
    assert!(json.get("limit").is_none());
    assert!(json.get("resets_at").is_none());
}

#[test]
fn test_closed_session_is_not_open() {
    let now = Utc::now();
    let record = SessionRecord {
        id: "abc".to_string(),
        provider: "synthetic".to_string(),
        started_at: now,
        ended_at: Some(now),
        start_values: UsageVector::from([1.0]),
        max_values: UsageVector::from([2.0]),
        snapshot_count: 3,
    };
    assert!(!record.is_open());
}
