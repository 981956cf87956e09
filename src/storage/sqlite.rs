//! SQLite backend for snapshots and preferences
//!
//! Uses deadpool-sqlite so blocking rusqlite calls run on the pool's worker
//! threads instead of the async executor.

use crate::error::{OfficeError, Result};
use crate::storage::{PreferenceStore, SnapshotRecord, SnapshotStore};
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::OptionalExtension;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS session_snapshots (
    session_id    TEXT PRIMARY KEY,
    last_sequence INTEGER NOT NULL,
    state         TEXT NOT NULL,
    saved_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS preferences (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!("Opening snapshot database at: {}", path_str);

        let pool = Config::new(path_str)
            .create_pool(Runtime::Tokio1)
            .map_err(|e| {
                OfficeError::Persistence(format!("Failed to create connection pool: {}", e))
            })?;

        let store = Self { pool };
        store
            .with_conn(|conn| conn.execute_batch(SCHEMA).map_err(OfficeError::from))
            .await?;

        debug!("Snapshot schema ready");
        Ok(store)
    }

    /// Run a blocking closure on a pooled connection
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            OfficeError::Persistence(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| OfficeError::Persistence(format!("Pool interaction failed: {}", e)))?
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OfficeError::Persistence(format!("Invalid stored timestamp {}: {}", raw, e)))
}

fn row_to_record(
    session_id: String,
    last_sequence: i64,
    state: String,
    saved_at: String,
) -> Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        session_id: SessionId::new(session_id),
        last_sequence: u64::try_from(last_sequence).map_err(|_| {
            OfficeError::Persistence(format!("Invalid stored sequence {}", last_sequence))
        })?,
        state: serde_json::from_str(&state)?,
        saved_at: parse_time(&saved_at)?,
    })
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn save_snapshot(&self, record: &SnapshotRecord) -> Result<()> {
        let session_id = record.session_id.to_string();
        let last_sequence = i64::try_from(record.last_sequence).map_err(|_| {
            OfficeError::Persistence(format!(
                "Sequence {} does not fit a snapshot row",
                record.last_sequence
            ))
        })?;
        let state = serde_json::to_string(&record.state)?;
        let saved_at = record.saved_at.to_rfc3339();

        debug!(
            "Saving snapshot for session {} at sequence {}",
            session_id, last_sequence
        );

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO session_snapshots (session_id, last_sequence, state, saved_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id) DO UPDATE SET
                     last_sequence = excluded.last_sequence,
                     state = excluded.state,
                     saved_at = excluded.saved_at
                 WHERE excluded.last_sequence >= session_snapshots.last_sequence",
                rusqlite::params![session_id, last_sequence, state, saved_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<SnapshotRecord>> {
        let id = session_id.to_string();
        let row: Option<(String, i64, String, String)> = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT session_id, last_sequence, state, saved_at
                         FROM session_snapshots WHERE session_id = ?1",
                        rusqlite::params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(id, seq, state, saved_at)| row_to_record(id, seq, state, saved_at))
            .transpose()
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        let rows: Vec<(String, i64, String, String)> = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT session_id, last_sequence, state, saved_at
                     FROM session_snapshots ORDER BY session_id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, seq, state, saved_at)| row_to_record(id, seq, state, saved_at))
            .collect()
    }

    async fn delete_snapshot(&self, session_id: &SessionId) -> Result<bool> {
        let id = session_id.to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM session_snapshots WHERE session_id = ?1",
                    rusqlite::params![id],
                )?)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn delete_all_snapshots(&self) -> Result<usize> {
        let removed = self
            .with_conn(|conn| Ok(conn.execute("DELETE FROM session_snapshots", [])?))
            .await?;
        info!("Purged {} persisted snapshots", removed);
        Ok(removed)
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM preferences WHERE key = ?1",
                    rusqlite::params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn put_preference(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let updated_at = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                rusqlite::params![key, value, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_preference(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM preferences WHERE key = ?1",
                    rusqlite::params![key],
                )?)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn list_preferences(&self) -> Result<BTreeMap<String, String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM preferences")?;
            let pairs = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<BTreeMap<String, String>, _>>()?;
            Ok(pairs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::session::{apply, SessionState};
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        let store = SqliteStore::open(db_path).await.unwrap();
        (store, temp_dir)
    }

    fn state_at(seq: u64) -> SessionState {
        let mut state = SessionState::new("s1".into());
        for n in 1..=seq {
            let event = Event::tool_use_end("s1", Utc::now(), "Read", true).with_sequence(n);
            state = apply(state, &event).0;
        }
        state
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let (store, _temp) = create_test_store().await;
        let record = SnapshotRecord::from_state(&state_at(3));

        store.save_snapshot(&record).await.unwrap();
        let loaded = store.load_snapshot(&"s1".into()).await.unwrap().unwrap();

        assert_eq!(loaded.last_sequence, 3);
        assert_eq!(loaded.state, record.state);
        assert!(store.load_snapshot(&"nope".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_older_snapshot_does_not_overwrite() {
        let (store, _temp) = create_test_store().await;
        store
            .save_snapshot(&SnapshotRecord::from_state(&state_at(5)))
            .await
            .unwrap();
        store
            .save_snapshot(&SnapshotRecord::from_state(&state_at(2)))
            .await
            .unwrap();

        let loaded = store.load_snapshot(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.last_sequence, 5);
        assert_eq!(loaded.state.counters.tool_uses, 5);
    }

    #[tokio::test]
    async fn test_sequence_bounds() {
        let (store, _temp) = create_test_store().await;
        let mut state = state_at(1);

        state.last_sequence = crate::events::MAX_SEQUENCE;
        store
            .save_snapshot(&SnapshotRecord::from_state(&state))
            .await
            .unwrap();
        let loaded = store.load_snapshot(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.last_sequence, crate::events::MAX_SEQUENCE);

        state.session_id = "s2".into();
        state.last_sequence = u64::MAX;
        let err = store
            .save_snapshot(&SnapshotRecord::from_state(&state))
            .await
            .unwrap_err();
        assert!(matches!(err, OfficeError::Persistence(_)));
        assert!(store.load_snapshot(&"s2".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_snapshots() {
        let (store, _temp) = create_test_store().await;
        let mut other = state_at(1);
        other.session_id = "s2".into();
        store
            .save_snapshot(&SnapshotRecord::from_state(&state_at(1)))
            .await
            .unwrap();
        store
            .save_snapshot(&SnapshotRecord::from_state(&other))
            .await
            .unwrap();

        assert_eq!(store.list_snapshots().await.unwrap().len(), 2);
        assert!(store.delete_snapshot(&"s1".into()).await.unwrap());
        assert!(!store.delete_snapshot(&"s1".into()).await.unwrap());
        assert_eq!(store.delete_all_snapshots().await.unwrap(), 1);
        assert!(store.list_snapshots().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preferences_last_write_wins() {
        let (store, _temp) = create_test_store().await;
        store.put_preference("mode", "todo").await.unwrap();
        store.put_preference("mode", "weather").await.unwrap();
        store.put_preference("theme", "dark").await.unwrap();

        assert_eq!(
            store.get_preference("mode").await.unwrap().as_deref(),
            Some("weather")
        );
        assert_eq!(store.list_preferences().await.unwrap().len(), 2);
        assert!(store.delete_preference("theme").await.unwrap());
        assert!(!store.delete_preference("theme").await.unwrap());
        assert!(store.get_preference("theme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        {
            let store = SqliteStore::open(&db_path).await.unwrap();
            store
                .save_snapshot(&SnapshotRecord::from_state(&state_at(4)))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&db_path).await.unwrap();
        let loaded = store.load_snapshot(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.last_sequence, 4);
    }
}
