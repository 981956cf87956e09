//! In-memory backend, nothing survives a restart

use crate::error::Result;
use crate::storage::{PreferenceStore, SnapshotRecord, SnapshotStore};
use crate::types::SessionId;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<BTreeMap<SessionId, SnapshotRecord>>,
    preferences: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_snapshot(&self, record: &SnapshotRecord) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&record.session_id) {
            Some(existing) if existing.last_sequence > record.last_sequence => {}
            _ => {
                snapshots.insert(record.session_id.clone(), record.clone());
            }
        }
        Ok(())
    }

    async fn load_snapshot(&self, session_id: &SessionId) -> Result<Option<SnapshotRecord>> {
        Ok(self.snapshots.read().await.get(session_id).cloned())
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotRecord>> {
        Ok(self.snapshots.read().await.values().cloned().collect())
    }

    async fn delete_snapshot(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.snapshots.write().await.remove(session_id).is_some())
    }

    async fn delete_all_snapshots(&self) -> Result<usize> {
        let mut snapshots = self.snapshots.write().await;
        let removed = snapshots.len();
        snapshots.clear();
        Ok(removed)
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        Ok(self.preferences.read().await.get(key).cloned())
    }

    async fn put_preference(&self, key: &str, value: &str) -> Result<()> {
        self.preferences
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_preference(&self, key: &str) -> Result<bool> {
        Ok(self.preferences.write().await.remove(key).is_some())
    }

    async fn list_preferences(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.preferences.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    #[tokio::test]
    async fn test_stale_snapshot_ignored() {
        let store = MemoryStore::new();
        let mut state = SessionState::new("s1".into());
        state.last_sequence = 8;
        store
            .save_snapshot(&SnapshotRecord::from_state(&state))
            .await
            .unwrap();
        state.last_sequence = 3;
        store
            .save_snapshot(&SnapshotRecord::from_state(&state))
            .await
            .unwrap();

        let loaded = store.load_snapshot(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.last_sequence, 8);
    }
}
