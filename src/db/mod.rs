use async_trait::async_trait;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresClient;

use models::{Checkpoint, Snapshot};

/// Durable storage for stream checkpoints and bucketed snapshots.
///
/// PostgreSQL backs production deployments. The in-memory store has the same
/// semantics and is used by tests and dry runs.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Checkpoint of `stream_id`, or a fresh one if the stream never ran.
    async fn load_checkpoint(&self, stream_id: &str) -> anyhow::Result<Checkpoint>;

    /// Snapshot of the bucket starting exactly at `timestamp`.
    async fn find_snapshot(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>>;

    /// Latest snapshot whose bucket starts strictly before `timestamp`.
    async fn find_latest_snapshot_before(&self, timestamp: i64) -> anyhow::Result<Option<Snapshot>>;

    /// Persist the checkpoint together with an optional dirty snapshot.
    ///
    /// Either both writes land or neither does.
    async fn commit(&self, checkpoint: &Checkpoint, snapshot: Option<&Snapshot>) -> anyhow::Result<()>;
}
