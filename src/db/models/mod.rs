mod asset_amount;
mod asset_price;
mod checkpoint;
mod snapshot;

pub use asset_amount::AssetAmount;
pub use asset_price::AssetPrice;
pub use checkpoint::{Checkpoint, UNSYNCED_HEIGHT};
pub use snapshot::Snapshot;
