pub mod aggregator;
pub mod barrier;
pub mod classifier;
pub mod engine;
pub mod price_oracle;

pub use aggregator::SnapshotAggregator;
pub use barrier::NetworkBarrier;
pub use classifier::{parse_selector, Classification, Direction};
pub use engine::{BlockSyncEngine, PassOutcome};
pub use price_oracle::{CoinGeckoSource, PriceCache, PriceOracle, PriceSource, ReferencePrices};
