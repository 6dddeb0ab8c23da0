use anyhow::Context;
use async_trait::async_trait;
use log::error;
use postgres_types::Json;
use tokio_postgres::Row;

use crate::db::{
    models::{AssetAmount, AssetPrice, Checkpoint, Snapshot},
    postgres::PostgresClient,
    SnapshotStore,
};

const SNAPSHOT_COLUMNS: &str = "timestamp, volume, locked, prices, fees";

#[async_trait]
impl SnapshotStore for PostgresClient {
    // ==================== CHECKPOINTS ====================

    async fn load_checkpoint(&self, stream_id: &str) -> anyhow::Result<Checkpoint> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT stream_id, synced_height, migration_count, initialized, updated_at
            FROM bridgetrack.checkpoints
            WHERE stream_id = $1
        "#;

        let row = client.query_opt(query, &[&stream_id]).await?;
        match row {
            Some(row) => row_to_checkpoint(&row),
            None => Ok(Checkpoint::new(stream_id)),
        }
    }

    // ==================== SNAPSHOTS ====================

    async fn find_snapshot(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM bridgetrack.snapshots WHERE timestamp = $1",
            SNAPSHOT_COLUMNS
        );

        let row = client.query_opt(query.as_str(), &[&timestamp]).await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    async fn find_latest_snapshot_before(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM bridgetrack.snapshots WHERE timestamp < $1 ORDER BY timestamp DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        );

        let row = client.query_opt(query.as_str(), &[&timestamp]).await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    // ==================== COMMIT ====================

    async fn commit(&self, checkpoint: &Checkpoint, snapshot: Option<&Snapshot>) -> anyhow::Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let synced_height = i64::try_from(checkpoint.synced_height)
            .with_context(|| format!("synced height {} out of range", checkpoint.synced_height))?;
        let migration_count = i32::try_from(checkpoint.migration_count)
            .with_context(|| format!("migration count {} out of range", checkpoint.migration_count))?;

        tx.execute(
            r#"
            INSERT INTO bridgetrack.checkpoints (
                stream_id, synced_height, migration_count, initialized, updated_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (stream_id) DO UPDATE SET
                synced_height = EXCLUDED.synced_height,
                migration_count = EXCLUDED.migration_count,
                initialized = EXCLUDED.initialized,
                updated_at = EXCLUDED.updated_at
            "#,
            &[
                &checkpoint.stream_id,
                &synced_height,
                &migration_count,
                &checkpoint.initialized,
                &checkpoint.updated_at,
            ],
        )
        .await
        .map_err(|e| {
            error!(
                "Failed to upsert checkpoint for stream {}: {:?}",
                checkpoint.stream_id, e
            );
            e
        })?;

        if let Some(snapshot) = snapshot {
            tx.execute(
                r#"
                INSERT INTO bridgetrack.snapshots (timestamp, volume, locked, prices, fees)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (timestamp) DO UPDATE SET
                    volume = EXCLUDED.volume,
                    locked = EXCLUDED.locked,
                    prices = EXCLUDED.prices,
                    fees = EXCLUDED.fees
                "#,
                &[
                    &snapshot.timestamp,
                    &Json(&snapshot.volume),
                    &Json(&snapshot.locked),
                    &Json(&snapshot.prices),
                    &Json(&snapshot.fees),
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to upsert snapshot {}: {:?}", snapshot.timestamp, e);
                e
            })?;
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit stream {}", checkpoint.stream_id))?;
        Ok(())
    }
}

fn row_to_checkpoint(row: &Row) -> anyhow::Result<Checkpoint> {
    let synced_height: i64 = row.get("synced_height");
    let migration_count: i32 = row.get("migration_count");

    Ok(Checkpoint {
        stream_id: row.get("stream_id"),
        synced_height: u64::try_from(synced_height)
            .with_context(|| format!("negative synced height {}", synced_height))?,
        migration_count: u32::try_from(migration_count)
            .with_context(|| format!("negative migration count {}", migration_count))?,
        initialized: row.get("initialized"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_snapshot(row: &Row) -> Snapshot {
    let Json(volume): Json<Vec<AssetAmount>> = row.get("volume");
    let Json(locked): Json<Vec<AssetAmount>> = row.get("locked");
    let Json(prices): Json<Vec<AssetPrice>> = row.get("prices");
    let Json(fees): Json<Vec<AssetAmount>> = row.get("fees");

    Snapshot {
        timestamp: row.get("timestamp"),
        volume,
        locked,
        prices,
        fees,
    }
}
