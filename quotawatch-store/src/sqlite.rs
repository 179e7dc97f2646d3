//! SQLite-backed store.
//!
//! A single `rusqlite` connection guarded by a mutex; every call runs on the
//! blocking pool so the poll loop never stalls on disk I/O. Timestamps are
//! stored as fixed-width RFC 3339 strings (UTC, microseconds) so that
//! lexical order is chronological order. Usage vectors and quota lists are
//! stored as JSON text.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use quotawatch_core::{QuotaReading, ResetCycle, SessionRecord, Snapshot, UsageVector};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persistence::ensure_dir;
use crate::store::Store;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        provider    TEXT NOT NULL,
        captured_at TEXT NOT NULL,
        quotas      TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_snapshots_provider_time
        ON snapshots(provider, captured_at);

    CREATE TABLE IF NOT EXISTS sessions (
        id             TEXT PRIMARY KEY,
        provider       TEXT NOT NULL,
        started_at     TEXT NOT NULL,
        ended_at       TEXT,
        start_values   TEXT NOT NULL,
        max_values     TEXT NOT NULL DEFAULT '[]',
        snapshot_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_sessions_provider_start
        ON sessions(provider, started_at);

    CREATE TABLE IF NOT EXISTS reset_cycles (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        provider    TEXT NOT NULL,
        quota_key   TEXT NOT NULL,
        cycle_start TEXT NOT NULL,
        cycle_end   TEXT,
        resets_at   TEXT,
        peak        REAL NOT NULL DEFAULT 0,
        total_delta REAL NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_cycles_provider_key
        ON reset_cycles(provider, quota_key, cycle_end);
";

const SESSION_COLUMNS: &str =
    "id, provider, started_at, ended_at, start_values, max_values, snapshot_count";

const CYCLE_COLUMNS: &str =
    "provider, quota_key, cycle_start, cycle_end, resets_at, peak, total_delta";

// ============================================================================
// Encoding
// ============================================================================

fn encode_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Parse(format!("timestamp {raw:?}: {e}")))
}

fn decode_opt_time(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(decode_time).transpose()
}

struct SessionRow {
    id: String,
    provider: String,
    started_at: String,
    ended_at: Option<String>,
    start_values: String,
    max_values: String,
    snapshot_count: i64,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            provider: row.get(1)?,
            started_at: row.get(2)?,
            ended_at: row.get(3)?,
            start_values: row.get(4)?,
            max_values: row.get(5)?,
            snapshot_count: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<SessionRecord, StoreError> {
        Ok(SessionRecord {
            id: self.id,
            provider: self.provider,
            started_at: decode_time(&self.started_at)?,
            ended_at: decode_opt_time(self.ended_at)?,
            start_values: serde_json::from_str(&self.start_values)?,
            max_values: serde_json::from_str(&self.max_values)?,
            snapshot_count: u64::try_from(self.snapshot_count).unwrap_or_default(),
        })
    }
}

struct CycleRow {
    provider: String,
    quota_key: String,
    cycle_start: String,
    cycle_end: Option<String>,
    resets_at: Option<String>,
    peak: f64,
    total_delta: f64,
}

impl CycleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            provider: row.get(0)?,
            quota_key: row.get(1)?,
            cycle_start: row.get(2)?,
            cycle_end: row.get(3)?,
            resets_at: row.get(4)?,
            peak: row.get(5)?,
            total_delta: row.get(6)?,
        })
    }

    fn into_cycle(self) -> Result<ResetCycle, StoreError> {
        Ok(ResetCycle {
            provider: self.provider,
            quota_key: self.quota_key,
            cycle_start: decode_time(&self.cycle_start)?,
            cycle_end: decode_opt_time(self.cycle_end)?,
            resets_at: decode_opt_time(self.resets_at)?,
            peak: self.peak,
            total_delta: self.total_delta,
        })
    }
}

fn expect_one(changed: usize, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if changed == 0 {
        Err(StoreError::NotFound(what()))
    } else {
        Ok(())
    }
}

// ============================================================================
// Store
// ============================================================================

/// Durable [`Store`] on a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Directory creation, open or schema failures.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await?;
        }

        let owned = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            let conn = Connection::open(&owned)?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        info!(path = %path.display(), "Opened database");
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Schema failures.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Task("connection mutex poisoned".to_string()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64, StoreError> {
        let provider = snapshot.provider.clone();
        let captured_at = encode_time(snapshot.captured_at);
        let quotas = serde_json::to_string(&snapshot.quotas)?;

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (provider, captured_at, quotas) VALUES (?1, ?2, ?3)",
                params![provider, captured_at, quotas],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn latest_snapshot(&self, provider: &str) -> Result<Option<Snapshot>, StoreError> {
        let provider = provider.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    "SELECT captured_at, quotas FROM snapshots
                     WHERE provider = ?1 ORDER BY captured_at DESC, id DESC LIMIT 1",
                    params![provider],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            let Some((captured_at, quotas)) = row else {
                return Ok(None);
            };
            let quotas: Vec<QuotaReading> = serde_json::from_str(&quotas)?;
            Ok(Some(Snapshot {
                provider,
                captured_at: decode_time(&captured_at)?,
                quotas,
            }))
        })
        .await
    }

    async fn create_session(
        &self,
        id: &str,
        provider: &str,
        started_at: DateTime<Utc>,
        start_values: &UsageVector,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let provider = provider.to_string();
        let started_at = encode_time(started_at);
        let start_values = serde_json::to_string(start_values)?;

        self.call(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, provider, started_at, start_values)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, provider, started_at, start_values],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_session(&self, id: &str, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = id.to_string();
        let ended_at = encode_time(ended_at);
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET ended_at = ?2 WHERE id = ?1",
                params![id, ended_at],
            )?;
            expect_one(changed, || format!("session {id}"))
        })
        .await
    }

    async fn increment_snapshot_count(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET snapshot_count = snapshot_count + 1 WHERE id = ?1",
                params![id],
            )?;
            expect_one(changed, || format!("session {id}"))
        })
        .await
    }

    async fn update_session_max(&self, id: &str, values: &UsageVector) -> Result<(), StoreError> {
        let id = id.to_string();
        let values = values.clone();
        self.call(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT max_values FROM sessions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(StoreError::NotFound(format!("session {id}")));
            };

            let mut max: UsageVector = serde_json::from_str(&current)?;
            max.raise_to(&values);
            conn.execute(
                "UPDATE sessions SET max_values = ?2 WHERE id = ?1",
                params![id, serde_json::to_string(&max)?],
            )?;
            Ok(())
        })
        .await
    }

    async fn close_orphaned_sessions(
        &self,
        provider: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let provider = provider.to_string();
        let ended_at = encode_time(ended_at);
        let closed = self
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE sessions SET ended_at = ?2 WHERE provider = ?1 AND ended_at IS NULL",
                    params![provider, ended_at],
                )?)
            })
            .await?;
        debug!(closed, "Closed orphaned sessions");
        Ok(closed)
    }

    async fn active_session(&self, provider: &str) -> Result<Option<SessionRecord>, StoreError> {
        let provider = provider.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE provider = ?1 AND ended_at IS NULL
                     ORDER BY started_at DESC LIMIT 1"
                ),
                params![provider],
                SessionRow::read,
            )
            .optional()?
            .map(SessionRow::into_record)
            .transpose()
        })
        .await
    }

    async fn session_history(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let provider = provider.map(str::to_string);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE ?1 IS NULL OR provider = ?1
                 ORDER BY started_at DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![provider, limit], SessionRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(SessionRow::into_record).collect()
        })
        .await
    }

    async fn create_cycle(&self, cycle: &ResetCycle) -> Result<(), StoreError> {
        let cycle = cycle.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO reset_cycles
                     (provider, quota_key, cycle_start, cycle_end, resets_at, peak, total_delta)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    cycle.provider,
                    cycle.quota_key,
                    encode_time(cycle.cycle_start),
                    cycle.cycle_end.map(encode_time),
                    cycle.resets_at.map(encode_time),
                    cycle.peak,
                    cycle.total_delta,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        let provider = provider.to_string();
        let quota_key = quota_key.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE reset_cycles SET peak = ?3, total_delta = ?4
                 WHERE provider = ?1 AND quota_key = ?2 AND cycle_end IS NULL",
                params![provider, quota_key, peak, total_delta],
            )?;
            expect_one(changed, || format!("active cycle {provider}/{quota_key}"))
        })
        .await
    }

    async fn close_cycle(
        &self,
        provider: &str,
        quota_key: &str,
        cycle_end: DateTime<Utc>,
        peak: f64,
        total_delta: f64,
    ) -> Result<(), StoreError> {
        let provider = provider.to_string();
        let quota_key = quota_key.to_string();
        let cycle_end = encode_time(cycle_end);
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE reset_cycles SET cycle_end = ?3, peak = ?4, total_delta = ?5
                 WHERE provider = ?1 AND quota_key = ?2 AND cycle_end IS NULL",
                params![provider, quota_key, cycle_end, peak, total_delta],
            )?;
            expect_one(changed, || format!("active cycle {provider}/{quota_key}"))
        })
        .await
    }

    async fn active_cycle(
        &self,
        provider: &str,
        quota_key: &str,
    ) -> Result<Option<ResetCycle>, StoreError> {
        let provider = provider.to_string();
        let quota_key = quota_key.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {CYCLE_COLUMNS} FROM reset_cycles
                     WHERE provider = ?1 AND quota_key = ?2 AND cycle_end IS NULL
                     ORDER BY cycle_start DESC, id DESC LIMIT 1"
                ),
                params![provider, quota_key],
                CycleRow::read,
            )
            .optional()?
            .map(CycleRow::into_cycle)
            .transpose()
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_encoding_is_fixed_width() {
        let a = encode_time(DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().into());
        let b = encode_time(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00.5Z")
                .unwrap()
                .into(),
        );
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(decode_time(&a).unwrap().to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_bad_timestamp_is_parse_error() {
        assert!(matches!(decode_time("yesterday"), Err(StoreError::Parse(_))));
    }

    #[tokio::test]
    async fn test_update_missing_session_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .update_session_max("ghost", &UsageVector::from([1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
