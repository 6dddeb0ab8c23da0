#[allow(clippy::module_inception)]
mod config;

pub use config::{PostgresSettings, PriceAsset, PriceSettings, Settings, StreamSettings, TrackerSettings};
