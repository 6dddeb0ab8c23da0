use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Height used to mark a stream that has never synced, or whose chain was
/// reset and must be replayed from the start.
pub const UNSYNCED_HEIGHT: u64 = 1;

/// Ingestion stream sync progress checkpoint (PostgreSQL).
///
/// Tracks the last fully processed block for each stream. Used to resume
/// indexing after restarts without missing or duplicating data, and to
/// recognize chain resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: String,
    pub synced_height: u64,
    pub migration_count: u32,
    /// Set once the stream has caught up with the chain head for the first time.
    pub initialized: bool,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            synced_height: UNSYNCED_HEIGHT,
            migration_count: 0,
            initialized: false,
            updated_at: Utc::now(),
        }
    }

    /// Detect a chain reset.
    ///
    /// A head more than `reset_threshold` blocks below the synced height means
    /// block numbering restarted. Bumps the migration counter and rewinds to
    /// the sentinel height. Returns true if a reset was detected.
    pub fn detect_migration(&mut self, head_height: u64, reset_threshold: u64) -> bool {
        if self.synced_height > UNSYNCED_HEIGHT
            && head_height < self.synced_height.saturating_sub(reset_threshold)
        {
            self.migration_count += 1;
            self.synced_height = UNSYNCED_HEIGHT;
            return true;
        }
        false
    }

    /// On the very first run, start from the current head instead of replaying
    /// history. Streams that went through a migration replay from the start.
    ///
    /// Returns true if the checkpoint was moved to the head.
    pub fn bootstrap(&mut self, head_height: u64) -> bool {
        if self.synced_height == UNSYNCED_HEIGHT && self.migration_count == 0 {
            self.synced_height = head_height;
            return true;
        }
        false
    }

    /// Record progress after a committed batch.
    pub fn advance_to(&mut self, height: u64) {
        self.synced_height = self.synced_height.max(height);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(height: u64) -> Checkpoint {
        let mut checkpoint = Checkpoint::new("mainnet-v0.3");
        checkpoint.synced_height = height;
        checkpoint
    }

    #[test]
    fn test_head_far_below_synced_height_is_a_migration() {
        let mut checkpoint = at(5000);
        assert!(checkpoint.detect_migration(3999, 1000));
        assert_eq!(checkpoint.migration_count, 1);
        assert_eq!(checkpoint.synced_height, UNSYNCED_HEIGHT);
    }

    #[test]
    fn test_head_within_threshold_is_not_a_migration() {
        let mut checkpoint = at(5000);
        assert!(!checkpoint.detect_migration(4001, 1000));
        assert_eq!(checkpoint.migration_count, 0);
        assert_eq!(checkpoint.synced_height, 5000);
    }

    #[test]
    fn test_unsynced_checkpoint_never_migrates() {
        let mut checkpoint = Checkpoint::new("testnet");
        assert!(!checkpoint.detect_migration(0, 1000));
        assert_eq!(checkpoint.migration_count, 0);
    }

    #[test]
    fn test_first_run_starts_from_head() {
        let mut checkpoint = Checkpoint::new("testnet");
        assert!(checkpoint.bootstrap(123_456));
        assert_eq!(checkpoint.synced_height, 123_456);
    }

    #[test]
    fn test_after_migration_replays_from_start() {
        let mut checkpoint = at(5000);
        checkpoint.detect_migration(10, 1000);
        assert!(!checkpoint.bootstrap(10));
        assert_eq!(checkpoint.synced_height, UNSYNCED_HEIGHT);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut checkpoint = at(100);
        checkpoint.advance_to(90);
        assert_eq!(checkpoint.synced_height, 100);
        checkpoint.advance_to(120);
        assert_eq!(checkpoint.synced_height, 120);
    }
}
