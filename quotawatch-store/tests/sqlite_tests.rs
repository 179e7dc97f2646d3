//! SQLite store tests against a real database file.

use chrono::{Duration, TimeZone, Utc};
use quotawatch_core::{QuotaReading, ResetCycle, Snapshot, UsageVector};
use quotawatch_store::{SqliteStore, Store, StoreError};
use tempfile::TempDir;

async fn open() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("data").join("quotawatch.db"))
        .await
        .unwrap();
    (dir, store)
}

// ============================================================================
// Snapshots
// ============================================================================

#[tokio::test]
async fn test_snapshot_roundtrip_keeps_latest() {
    let (_dir, store) = open().await;
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let first = Snapshot::captured_at(
        "zai",
        t0,
        vec![QuotaReading::new("tokens", 10.0).with_limit(100.0)],
    );
    let second = Snapshot::captured_at(
        "zai",
        t0 + Duration::minutes(1),
        vec![
            QuotaReading::new("tokens", 20.0)
                .with_limit(100.0)
                .with_resets_at(t0 + Duration::hours(5)),
        ],
    );

    let id1 = store.insert_snapshot(&first).await.unwrap();
    let id2 = store.insert_snapshot(&second).await.unwrap();
    assert!(id2 > id1);

    let latest = store.latest_snapshot("zai").await.unwrap().unwrap();
    assert_eq!(latest, second);
    assert!(store.latest_snapshot("other").await.unwrap().is_none());
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_counts_and_maxima() {
    let (_dir, store) = open().await;
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    store
        .create_session("s1", "zai", t0, &UsageVector::from([100.0, 50.0, 500.0]))
        .await
        .unwrap();
    for values in [[200.0, 60.0, 600.0], [150.0, 100.0, 700.0]] {
        store.increment_snapshot_count("s1").await.unwrap();
        store
            .update_session_max("s1", &UsageVector::from(values))
            .await
            .unwrap();
    }

    let active = store.active_session("zai").await.unwrap().unwrap();
    assert_eq!(active.id, "s1");
    assert_eq!(active.snapshot_count, 2);
    assert_eq!(active.start_values, UsageVector::from([100.0, 50.0, 500.0]));
    assert_eq!(active.max_values, UsageVector::from([200.0, 100.0, 700.0]));
    assert!(active.is_open());

    store.close_session("s1", t0 + Duration::minutes(10)).await.unwrap();
    assert!(store.active_session("zai").await.unwrap().is_none());

    let history = store.session_history(Some("zai"), 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].ended_at, Some(t0 + Duration::minutes(10)));
}

#[tokio::test]
async fn test_orphans_closed_for_one_provider_only() {
    let (_dir, store) = open().await;
    let now = Utc::now();
    let start = UsageVector::from([1.0]);

    store.create_session("a", "zai", now, &start).await.unwrap();
    store.create_session("b", "synthetic", now, &start).await.unwrap();

    assert_eq!(store.close_orphaned_sessions("zai", now).await.unwrap(), 1);
    assert_eq!(store.close_orphaned_sessions("zai", now).await.unwrap(), 0);
    assert!(store.active_session("synthetic").await.unwrap().is_some());
}

#[tokio::test]
async fn test_history_filter_and_limit() {
    let (_dir, store) = open().await;
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let start = UsageVector::default();

    for i in 0..4 {
        let provider = if i % 2 == 0 { "zai" } else { "synthetic" };
        store
            .create_session(&format!("s{i}"), provider, t0 + Duration::hours(i), &start)
            .await
            .unwrap();
    }

    let all = store.session_history(None, 3).await.unwrap();
    let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s3", "s2", "s1"]);

    let zai = store.session_history(Some("zai"), 10).await.unwrap();
    let ids: Vec<_> = zai.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s2", "s0"]);
}

#[tokio::test]
async fn test_missing_session_reports_not_found() {
    let (_dir, store) = open().await;
    let err = store.close_session("ghost", Utc::now()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quotawatch.db");

    {
        let store = SqliteStore::open(&path).await.unwrap();
        store
            .create_session("s1", "zai", Utc::now(), &UsageVector::from([1.0]))
            .await
            .unwrap();
    }

    let store = SqliteStore::open(&path).await.unwrap();
    assert_eq!(store.active_session("zai").await.unwrap().unwrap().id, "s1");
}

// ============================================================================
// Reset Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_lifecycle() {
    let (_dir, store) = open().await;
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

    store
        .create_cycle(&ResetCycle {
            provider: "zai".into(),
            quota_key: "tokens".into(),
            cycle_start: t0,
            cycle_end: None,
            resets_at: Some(t0 + Duration::hours(5)),
            peak: 10.0,
            total_delta: 0.0,
        })
        .await
        .unwrap();

    store.update_cycle("zai", "tokens", 40.0, 30.0).await.unwrap();
    let active = store.active_cycle("zai", "tokens").await.unwrap().unwrap();
    assert!((active.peak - 40.0).abs() < f64::EPSILON);
    assert!((active.total_delta - 30.0).abs() < f64::EPSILON);

    store
        .close_cycle("zai", "tokens", t0 + Duration::hours(5), 45.0, 35.0)
        .await
        .unwrap();
    assert!(store.active_cycle("zai", "tokens").await.unwrap().is_none());

    let err = store.update_cycle("zai", "tokens", 1.0, 1.0).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
