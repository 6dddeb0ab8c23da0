use std::collections::HashMap;

use config::{Config, ConfigError, File};
use serde::Deserialize;
use url::Url;

use crate::chain::ProtocolVersion;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Stream checkpoints
/// - Bucketed snapshots
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Block sync loop configuration, shared by every stream.
#[derive(Debug, Deserialize, Clone)]
pub struct TrackerSettings {
    /// Sleep between two passes of the sync loop.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Blocks requested per RPC call. Halved while the node rejects it.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Batches per pass. Bounds how long a pass runs between checkpoints.
    #[serde(default = "default_batch_count")]
    pub batch_count: u64,
    /// A head this far below the checkpoint means the chain was reset.
    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: u64,
    /// Wait before retrying a transient RPC failure.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_batch_size() -> u64 {
    16
}

fn default_batch_count() -> u64 {
    40
}

fn default_reset_threshold() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_rpc_timeout_secs() -> u64 {
    60
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            batch_count: default_batch_count(),
            reset_threshold: default_reset_threshold(),
            retry_delay_ms: default_retry_delay_ms(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

/// An asset the price provider knows about.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PriceAsset {
    /// Exponent of the smallest on-chain unit.
    pub decimals: u32,
    /// Identifier of the asset at the price provider.
    pub provider_id: String,
}

impl PriceAsset {
    fn new(decimals: u32, provider_id: &str) -> Self {
        Self {
            decimals,
            provider_id: provider_id.to_string(),
        }
    }
}

/// Reference price provider configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PriceSettings {
    #[serde(default = "default_provider_url")]
    pub provider_url: String,
    /// How long a live price is reused.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Wait before asking again after the provider throttled us.
    #[serde(default = "default_throttle_delay_secs")]
    pub throttle_delay_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Symbol to provider mapping. Assets missing here are recorded unpriced.
    #[serde(default = "default_assets")]
    pub assets: HashMap<String, PriceAsset>,
}

fn default_provider_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_throttle_delay_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_assets() -> HashMap<String, PriceAsset> {
    [
        ("BTC", PriceAsset::new(8, "bitcoin")),
        ("ZEC", PriceAsset::new(8, "zcash")),
        ("BCH", PriceAsset::new(8, "bitcoin-cash")),
        ("FIL", PriceAsset::new(18, "filecoin")),
        ("DGB", PriceAsset::new(8, "digibyte")),
        ("DOGE", PriceAsset::new(8, "dogecoin")),
        ("LUNA", PriceAsset::new(6, "terra-luna")),
        ("ETH", PriceAsset::new(18, "ethereum")),
        ("REN", PriceAsset::new(18, "republic-protocol")),
        ("DAI", PriceAsset::new(18, "dai")),
    ]
    .into_iter()
    .map(|(symbol, asset)| (symbol.to_string(), asset))
    .collect()
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            provider_url: default_provider_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            throttle_delay_secs: default_throttle_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            assets: default_assets(),
        }
    }
}

/// One ingestion stream: a node endpoint and the protocol generation it speaks.
///
/// All streams in a deployment write to the same snapshot table and are kept
/// in step by the network barrier.
#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    /// Unique name, also the checkpoint key.
    pub name: String,
    pub rpc_url: String,
    pub protocol: ProtocolVersion,
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub prices: PriceSettings,
    pub streams: Vec<StreamSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.streams.is_empty() {
            return Err(ConfigError::Message("at least one stream must be configured".into()));
        }
        for (i, stream) in self.streams.iter().enumerate() {
            if self.streams[..i].iter().any(|s| s.name == stream.name) {
                return Err(ConfigError::Message(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
        }
        for stream in &self.streams {
            Url::parse(&stream.rpc_url).map_err(|e| {
                ConfigError::Message(format!("invalid rpc_url for stream '{}': {}", stream.name, e))
            })?;
        }
        Url::parse(&self.prices.provider_url)
            .map_err(|e| ConfigError::Message(format!("invalid prices.provider_url: {}", e)))?;
        if self.tracker.batch_size == 0 || self.tracker.batch_count == 0 {
            return Err(ConfigError::Message(
                "tracker batch_size and batch_count must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(yaml: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    const MINIMAL: &str = r#"
postgres:
  host: localhost
  port: 5432
  user: postgres
  password: postgres
  database: bridgetrack
streams:
  - name: mainnet-v0.2
    rpc_url: https://lightnode-mainnet.herokuapp.com
    protocol: v0.2
  - name: mainnet-v0.3
    rpc_url: https://mainnet.renproject.io
    protocol: v0.3
"#;

    #[test]
    fn test_defaults_are_applied() {
        let settings = parse(MINIMAL).unwrap();
        assert_eq!(settings.postgres.pool_size, 16);
        assert_eq!(settings.tracker.poll_interval_secs, 10);
        assert_eq!(settings.tracker.reset_threshold, 1000);
        assert_eq!(settings.prices.cache_ttl_secs, 10);
        assert_eq!(settings.prices.assets["LUNA"], PriceAsset::new(6, "terra-luna"));
        assert_eq!(settings.streams[0].protocol, ProtocolVersion::Legacy);
        assert_eq!(settings.streams[1].protocol, ProtocolVersion::Current);
    }

    #[test]
    fn test_duplicate_stream_names_are_rejected() {
        let yaml = MINIMAL.replace("mainnet-v0.3", "mainnet-v0.2");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_invalid_rpc_url_is_rejected() {
        let yaml = MINIMAL.replace("https://mainnet.renproject.io", "not a url");
        assert!(parse(&yaml).is_err());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let yaml = format!("{}tracker:\n  batch_size: 0\n", MINIMAL);
        assert!(parse(&yaml).is_err());
    }
}
