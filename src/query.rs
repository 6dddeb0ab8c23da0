use chrono::Utc;

use crate::{
    db::{models::Snapshot, SnapshotStore},
    error::QueryError,
    utils::bucket_timestamp,
};

/// Snapshot in force at `timestamp` (default now): the one with the greatest
/// bucket timestamp not after the requested time.
///
/// Fails with [`QueryError::NotFound`] when no such bucket exists. Callers
/// must not substitute zeroes for missing history.
pub async fn snapshot_at(
    store: &dyn SnapshotStore,
    timestamp: Option<i64>,
) -> Result<Snapshot, QueryError> {
    let requested = timestamp.unwrap_or_else(|| Utc::now().timestamp());
    let bucket = bucket_timestamp(requested);

    if let Some(snapshot) = store.find_snapshot(bucket).await? {
        return Ok(snapshot);
    }
    store
        .find_latest_snapshot_before(bucket)
        .await?
        .ok_or(QueryError::NotFound(requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{models::Checkpoint, MemoryStore};

    async fn store_with(buckets: &[i64]) -> MemoryStore {
        let store = MemoryStore::new();
        let checkpoint = Checkpoint::new("v0.3");
        for bucket in buckets {
            store.commit(&checkpoint, Some(&Snapshot::new(*bucket))).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_exact_bucket() {
        let store = store_with(&[600, 900]).await;
        let snapshot = snapshot_at(&store, Some(950)).await.unwrap();
        assert_eq!(snapshot.timestamp, 900);
    }

    #[tokio::test]
    async fn test_falls_back_to_latest_earlier_bucket() {
        let store = store_with(&[600]).await;
        let snapshot = snapshot_at(&store, Some(10_000)).await.unwrap();
        assert_eq!(snapshot.timestamp, 600);
    }

    #[tokio::test]
    async fn test_nothing_before_is_not_found() {
        let store = store_with(&[900]).await;
        assert!(matches!(
            snapshot_at(&store, Some(899)).await,
            Err(QueryError::NotFound(899))
        ));
        assert!(matches!(
            snapshot_at(&MemoryStore::new(), None).await,
            Err(QueryError::NotFound(_))
        ));
    }
}
