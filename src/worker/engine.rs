use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use log::{info, warn};

use super::{aggregator::SnapshotAggregator, barrier::NetworkBarrier};
use crate::{
    chain::{Block, ChainClient, Protocol, RawBlock, StateSummary},
    config::TrackerSettings,
    db::{
        models::{Checkpoint, Snapshot},
        SnapshotStore,
    },
    error::RpcError,
    utils::bucket_timestamp,
};

/// Result of one pass of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Already at the chain head.
    Idle,
    /// Blocks were processed up to this height.
    Synced(u64),
    /// Held at this bucket until sibling streams catch up.
    Waiting(i64),
}

/// Polling sync loop of one ingestion stream.
///
/// Each pass reads the checkpoint, detects chain resets, fetches up to
/// `batch_size * batch_count` blocks and folds them bucket by bucket into
/// snapshots. Every bucket is committed together with the checkpoint.
pub struct BlockSyncEngine {
    stream: String,
    client: Arc<dyn ChainClient>,
    protocol: Arc<dyn Protocol>,
    store: Arc<dyn SnapshotStore>,
    barrier: Arc<NetworkBarrier>,
    aggregator: SnapshotAggregator,
    settings: TrackerSettings,
}

impl BlockSyncEngine {
    pub fn new(
        stream: impl Into<String>,
        client: Arc<dyn ChainClient>,
        protocol: Arc<dyn Protocol>,
        store: Arc<dyn SnapshotStore>,
        barrier: Arc<NetworkBarrier>,
        aggregator: SnapshotAggregator,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            stream: stream.into(),
            client,
            protocol,
            store,
            barrier,
            aggregator,
            settings,
        }
    }

    /// Run passes forever. Returns only on an unrecoverable error.
    pub async fn run(&self) -> anyhow::Result<()> {
        let poll_interval = Duration::from_secs(self.settings.poll_interval_secs);
        info!(
            "[{}] Starting {} sync loop",
            self.stream,
            self.protocol.version()
        );

        loop {
            self.sync_once()
                .await
                .with_context(|| format!("[{}] sync pass failed", self.stream))?;
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn sync_once(&self) -> anyhow::Result<PassOutcome> {
        let mut checkpoint = self.store.load_checkpoint(&self.stream).await?;
        let head = self.fetch_head().await?;

        // Read after the head so the head block's transactions are included.
        let state = match self.client.state_summary().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("[{}] Unable to fetch block state: {}", self.stream, e);
                None
            }
        };

        if checkpoint.detect_migration(head.height, self.settings.reset_threshold) {
            warn!(
                "[{}] Chain reset detected: head {} is far below the checkpoint, replaying (migration #{})",
                self.stream, head.height, checkpoint.migration_count
            );
        }
        if checkpoint.bootstrap(head.height) {
            info!(
                "[{}] First run, starting from head block {}",
                self.stream, head.height
            );
        }

        if checkpoint.synced_height >= head.height {
            return self.idle(checkpoint).await;
        }

        let to = head.height.min(
            checkpoint.synced_height + self.settings.batch_size * self.settings.batch_count,
        );
        info!(
            "[{}] Syncing blocks {} to {} (head {})",
            self.stream,
            checkpoint.synced_height + 1,
            to,
            head.height
        );

        let retry_delay = Duration::from_millis(self.settings.retry_delay_ms);
        let mut batch_size = self.settings.batch_size;
        let mut next = checkpoint.synced_height + 1;

        while next <= to {
            let count = batch_size.min(to - next + 1);
            let blocks = match self
                .protocol
                .fetch_batch(self.client.as_ref(), next, count)
                .await
            {
                Ok(blocks) => blocks,
                Err(RpcError::BatchTooLarge(reason)) if count > 1 => {
                    batch_size = count / 2;
                    warn!(
                        "[{}] Batch of {} blocks too large ({}), retrying with {}",
                        self.stream, count, reason, batch_size
                    );
                    continue;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        "[{}] Fetching blocks {}..{} failed: {}, retrying in {:?}",
                        self.stream,
                        next,
                        next + count - 1,
                        e,
                        retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("fetching {} blocks from {}", count, next)
                    });
                }
            };

            let synced = checkpoint.synced_height;
            let mut blocks: Vec<Block> = blocks.into_iter().filter(|b| b.height > synced).collect();
            if blocks.is_empty() {
                // The range is below the head, so the node is lagging. Retry
                // it on the next pass rather than skip it.
                warn!(
                    "[{}] Node returned no blocks for {}..{}, retrying next pass",
                    self.stream,
                    next,
                    next + count - 1
                );
                break;
            }
            blocks.sort_by_key(|b| b.height);

            for (bucket, group) in group_by_bucket(blocks) {
                let committed = self
                    .commit_bucket(&mut checkpoint, bucket, group, head.height, state.as_ref())
                    .await?;
                if !committed {
                    self.store.commit(&checkpoint, None).await?;
                    return Ok(PassOutcome::Waiting(bucket));
                }
            }

            next = checkpoint.synced_height + 1;
        }

        self.store.commit(&checkpoint, None).await?;
        Ok(PassOutcome::Synced(checkpoint.synced_height))
    }

    async fn fetch_head(&self) -> anyhow::Result<RawBlock> {
        let retry_delay = Duration::from_millis(self.settings.retry_delay_ms);
        loop {
            match self.protocol.fetch_head(self.client.as_ref()).await {
                Ok(head) => return Ok(head),
                Err(e) if e.is_transient() => {
                    warn!(
                        "[{}] Fetching head failed: {}, retrying in {:?}",
                        self.stream, e, retry_delay
                    );
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => return Err(e).context("fetching head block"),
            }
        }
    }

    /// Nothing to sync. Still signal the barrier so siblings are not held
    /// back by an idle stream.
    async fn idle(&self, mut checkpoint: Checkpoint) -> anyhow::Result<PassOutcome> {
        self.barrier
            .lock()
            .await
            .arrive_at(&self.stream, bucket_timestamp(Utc::now().timestamp()));

        if !checkpoint.initialized {
            checkpoint.initialized = true;
            info!(
                "[{}] Caught up with head block {}",
                self.stream, checkpoint.synced_height
            );
        }
        self.store.commit(&checkpoint, None).await?;
        Ok(PassOutcome::Idle)
    }

    /// Fold one bucket's blocks into its snapshot and commit it.
    ///
    /// Prices are resolved before the barrier is taken. The guard is then held
    /// from the load to the commit so sibling streams never interleave writes
    /// to the same bucket. Returns false when the barrier holds this stream
    /// back.
    async fn commit_bucket(
        &self,
        checkpoint: &mut Checkpoint,
        bucket: i64,
        blocks: Vec<Block>,
        head_height: u64,
        state: Option<&StateSummary>,
    ) -> anyhow::Result<bool> {
        let head_state = state.filter(|_| blocks.iter().any(|b| b.height == head_height));
        let assets = self
            .aggregator
            .assets_in(blocks.iter().flat_map(|b| &b.transactions), head_state);
        let prices = self.aggregator.resolve_prices(&assets, bucket).await;

        let mut gate = self.barrier.lock().await;
        if !gate.arrive_at(&self.stream, bucket) {
            info!(
                "[{}] Waiting for other streams to reach bucket {}",
                self.stream, bucket
            );
            return Ok(false);
        }

        let mut snapshot = match self.store.find_snapshot(bucket).await? {
            Some(snapshot) => snapshot,
            None => {
                let previous = self.store.find_latest_snapshot_before(bucket).await?;
                Snapshot::seeded(bucket, previous.as_ref())
            }
        };

        for block in &blocks {
            let block_state = state.filter(|_| block.height == head_height);
            for tx in &block.transactions {
                self.aggregator
                    .handle_transaction(&mut snapshot, tx, block_state, &prices)?;
            }
            if let Some(block_state) = block_state {
                self.aggregator
                    .handle_block_state(&mut snapshot, block_state, &prices)?;
            }
            checkpoint.advance_to(block.height);
        }

        self.store
            .commit(checkpoint, Some(&snapshot))
            .await
            .with_context(|| format!("committing bucket {}", bucket))?;
        drop(gate);

        let locked = snapshot
            .locked
            .iter()
            .map(|l| format!("{} {}", l.label(), l.amount))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "[{}] Committed bucket {} at block {} (locked: {})",
            self.stream, bucket, checkpoint.synced_height, locked
        );
        Ok(true)
    }
}

/// Split height-ordered blocks into runs sharing a bucket.
fn group_by_bucket(blocks: Vec<Block>) -> Vec<(i64, Vec<Block>)> {
    let mut groups: Vec<(i64, Vec<Block>)> = Vec::new();
    for block in blocks {
        let bucket = bucket_timestamp(block.timestamp);
        match groups.last_mut() {
            Some((current, group)) if *current == bucket => group.push(block),
            _ => groups.push((bucket, vec![block])),
        }
    }
    groups
}
