use std::collections::BTreeMap;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use super::{
    models::{Checkpoint, Snapshot},
    SnapshotStore,
};

#[derive(Default)]
struct Tables {
    checkpoints: FxHashMap<String, Checkpoint>,
    snapshots: BTreeMap<i64, Snapshot>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn snapshot_count(&self) -> usize {
        self.tables.lock().await.snapshots.len()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_checkpoint(&self, stream_id: &str) -> anyhow::Result<Checkpoint> {
        let tables = self.tables.lock().await;
        Ok(tables
            .checkpoints
            .get(stream_id)
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(stream_id)))
    }

    async fn find_snapshot(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>> {
        Ok(self.tables.lock().await.snapshots.get(&timestamp).cloned())
    }

    async fn find_latest_snapshot_before(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .snapshots
            .range(..timestamp)
            .next_back()
            .map(|(_, snapshot)| snapshot.clone()))
    }

    async fn commit(&self, checkpoint: &Checkpoint, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .checkpoints
            .insert(checkpoint.stream_id.clone(), checkpoint.clone());
        if let Some(snapshot) = snapshot {
            tables.snapshots.insert(snapshot.timestamp, snapshot.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UNSYNCED_HEIGHT;

    #[tokio::test]
    async fn test_unknown_stream_gets_fresh_checkpoint() {
        let store = MemoryStore::new();
        let checkpoint = store.load_checkpoint("v0.3").await.unwrap();
        assert_eq!(checkpoint.stream_id, "v0.3");
        assert_eq!(checkpoint.synced_height, UNSYNCED_HEIGHT);
        assert!(!checkpoint.initialized);
    }

    #[tokio::test]
    async fn test_commit_and_lookup() {
        let store = MemoryStore::new();
        let mut checkpoint = Checkpoint::new("v0.3");
        checkpoint.advance_to(42);

        store.commit(&checkpoint, Some(&Snapshot::new(600))).await.unwrap();
        store.commit(&checkpoint, Some(&Snapshot::new(1200))).await.unwrap();
        store.commit(&checkpoint, None).await.unwrap();

        assert_eq!(store.load_checkpoint("v0.3").await.unwrap().synced_height, 42);
        assert_eq!(store.snapshot_count().await, 2);
        assert!(store.find_snapshot(600).await.unwrap().is_some());
        assert!(store.find_snapshot(900).await.unwrap().is_none());

        let before = store.find_latest_snapshot_before(1200).await.unwrap().unwrap();
        assert_eq!(before.timestamp, 600);
        assert!(store.find_latest_snapshot_before(600).await.unwrap().is_none());
    }
}
