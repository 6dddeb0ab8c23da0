pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod query;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use db::{MemoryStore, PostgresClient, SnapshotStore};
pub use worker::{BlockSyncEngine, NetworkBarrier, PriceOracle, SnapshotAggregator};
