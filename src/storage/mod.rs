//! Storage layer for session snapshots and viewer preferences
//!
//! Snapshots are the only durable form of session state: one record per
//! session holding the serialized state and the last applied sequence
//! number. Preferences are an unordered string key/value store.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::session::SessionState;
use crate::types::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persisted session snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub session_id: SessionId,
    /// Sequence of the last event folded into `state`
    pub last_sequence: u64,
    pub state: SessionState,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            session_id: state.session_id.clone(),
            last_sequence: state.last_sequence,
            state: state.clone(),
            saved_at: Utc::now(),
        }
    }
}

/// Durable snapshot storage
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace a snapshot. A snapshot older than the stored one
    /// (lower `last_sequence`) is ignored.
    async fn save_snapshot(&self, record: &SnapshotRecord) -> Result<()>;

    /// Load one session's snapshot
    async fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<SnapshotRecord>>;

    /// Every persisted snapshot, ordered by session id
    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>>;

    /// Remove one snapshot; returns whether it existed
    async fn delete_snapshot(&self, session_id: &SessionId) -> Result<bool>;

    /// Remove every snapshot; returns how many were removed
    async fn delete_all_snapshots(&self) -> Result<usize>;
}

/// Viewer preference storage (last write wins)
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_preference(&self, key: &str) -> Result<Option<String>>;

    async fn put_preference(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed
    async fn delete_preference(&self, key: &str) -> Result<bool>;

    async fn list_preferences(&self) -> Result<BTreeMap<String, String>>;
}
