use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use moka::future::Cache;
use reqwest::StatusCode;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::{
    config::{PriceAsset, PriceSettings},
    db::models::AssetPrice,
    error::PriceError,
    utils::validate_reference_price,
};

/// Prices for timestamps older than this are looked up by calendar day.
const LIVE_WINDOW_SECS: i64 = 3600;

/// Reference prices of one unit of an asset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferencePrices {
    pub eth: f64,
    pub btc: f64,
    pub usd: f64,
}

/// External provider of reference prices.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current prices when `date` is None, otherwise the prices recorded for
    /// that day.
    async fn fetch_price(
        &self,
        provider_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<ReferencePrices, PriceError>;
}

// ============================================
// Cache
// ============================================

/// Two-tier price cache.
///
/// Live prices expire after the configured TTL. Historic prices are keyed by
/// calendar day and never change once observed.
#[derive(Clone)]
pub struct PriceCache {
    live: Cache<String, AssetPrice>,
    historic: Cache<(String, NaiveDate), AssetPrice>,
}

impl PriceCache {
    pub fn new(live_ttl: Duration) -> Self {
        let live = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(live_ttl)
            .build();
        let historic = Cache::builder().max_capacity(100_000).build();
        Self { live, historic }
    }
}

// ============================================
// Oracle
// ============================================

/// Resolves the reference price of an asset at a point in time.
///
/// Shared by every ingestion stream.
pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    cache: PriceCache,
    assets: FxHashMap<String, PriceAsset>,
    throttle_delay: Duration,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>, cache: PriceCache, settings: &PriceSettings) -> Self {
        Self {
            source,
            cache,
            assets: settings
                .assets
                .iter()
                .map(|(symbol, asset)| (symbol.to_uppercase(), asset.clone()))
                .collect(),
            throttle_delay: Duration::from_secs(settings.throttle_delay_secs),
        }
    }

    /// Whether `asset` is in the provider table at all.
    pub fn knows(&self, asset: &str) -> bool {
        self.assets.contains_key(asset)
    }

    /// Price of `asset` at `timestamp` (unix seconds).
    pub async fn price(&self, asset: &str, timestamp: i64) -> Result<AssetPrice, PriceError> {
        self.price_at(asset, timestamp, Utc::now().timestamp()).await
    }

    pub(crate) async fn price_at(
        &self,
        asset: &str,
        timestamp: i64,
        now: i64,
    ) -> Result<AssetPrice, PriceError> {
        let info = self
            .assets
            .get(asset)
            .ok_or_else(|| PriceError::UnknownAsset(asset.to_string()))?;

        if now - timestamp <= LIVE_WINDOW_SECS {
            if let Some(price) = self.cache.live.get(asset).await {
                return Ok(price);
            }
            let price = self.fetch(asset, info, None).await?;
            self.cache.live.insert(asset.to_string(), price.clone()).await;
            return Ok(price);
        }

        let date = DateTime::from_timestamp(timestamp, 0)
            .map(|t| t.date_naive())
            .ok_or_else(|| PriceError::Provider(format!("invalid timestamp {timestamp}")))?;
        let key = (asset.to_string(), date);
        if let Some(price) = self.cache.historic.get(&key).await {
            return Ok(price);
        }
        let price = self.fetch(asset, info, Some(date)).await?;
        self.cache.historic.insert(key, price.clone()).await;
        Ok(price)
    }

    /// Ask the provider, waiting out throttling for as long as it lasts.
    async fn fetch(
        &self,
        asset: &str,
        info: &PriceAsset,
        date: Option<NaiveDate>,
    ) -> Result<AssetPrice, PriceError> {
        let label = date.map_or_else(|| "now".to_string(), |d| d.format("%d-%m-%Y").to_string());
        info!("Getting price for {} ({})", asset, label);

        let prices = loop {
            match self.source.fetch_price(&info.provider_id, date).await {
                Ok(prices) => break prices,
                Err(PriceError::Throttled) => {
                    warn!(
                        "Price provider throttled {} lookup, retrying in {:?}",
                        asset, self.throttle_delay
                    );
                    tokio::time::sleep(self.throttle_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let valid = validate_reference_price(prices.eth).is_some()
            && validate_reference_price(prices.btc).is_some()
            && validate_reference_price(prices.usd).is_some();
        if !valid {
            return Err(PriceError::InvalidPrice {
                asset: asset.to_string(),
                eth: prices.eth,
                btc: prices.btc,
                usd: prices.usd,
            });
        }

        Ok(AssetPrice::new(asset, info.decimals, prices.eth, prices.btc, prices.usd))
    }
}

// ============================================
// CoinGecko
// ============================================

const COINGECKO_PARAMS: &str = "localization=false&tickers=false&market_data=true&community_data=false&developer_data=false&sparkline=false";

#[derive(Debug, Deserialize)]
struct CoinResponse {
    market_data: Option<MarketData>,
}

#[derive(Debug, Deserialize)]
struct MarketData {
    current_price: CurrentPrice,
}

#[derive(Debug, Deserialize)]
struct CurrentPrice {
    eth: f64,
    btc: f64,
    usd: f64,
}

/// CoinGecko v3 public API.
pub struct CoinGeckoSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, provider_id: &str, date: Option<NaiveDate>) -> String {
        match date {
            Some(date) => format!(
                "{}/coins/{}/history?{}&date={}",
                self.base_url,
                provider_id,
                COINGECKO_PARAMS,
                date.format("%d-%m-%Y")
            ),
            None => format!("{}/coins/{}?{}", self.base_url, provider_id, COINGECKO_PARAMS),
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_price(
        &self,
        provider_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<ReferencePrices, PriceError> {
        let response = self
            .http_client
            .get(self.url(provider_id, date))
            .send()
            .await
            .map_err(|e| PriceError::Provider(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PriceError::Throttled);
        }
        if !status.is_success() {
            return Err(PriceError::Provider(format!(
                "{provider_id}: HTTP status {status}"
            )));
        }

        let body: CoinResponse = response
            .json()
            .await
            .map_err(|e| PriceError::Provider(format!("{provider_id}: {e}")))?;

        let price = body
            .market_data
            .ok_or_else(|| PriceError::Provider(format!("{provider_id}: no market data")))?
            .current_price;

        Ok(ReferencePrices {
            eth: price.eth,
            btc: price.btc,
            usd: price.usd,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Scripted provider: pops one response per call, then repeats `fallback`.
    pub(crate) struct FakeSource {
        pub calls: AtomicUsize,
        pub dates: Mutex<Vec<Option<NaiveDate>>>,
        script: Mutex<Vec<Result<ReferencePrices, PriceError>>>,
        fallback: ReferencePrices,
    }

    impl FakeSource {
        pub(crate) fn new(fallback: ReferencePrices) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                dates: Mutex::new(Vec::new()),
                script: Mutex::new(Vec::new()),
                fallback,
            }
        }

        fn scripted(fallback: ReferencePrices, mut script: Vec<Result<ReferencePrices, PriceError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                ..Self::new(fallback)
            }
        }
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        async fn fetch_price(
            &self,
            _provider_id: &str,
            date: Option<NaiveDate>,
        ) -> Result<ReferencePrices, PriceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.dates.lock().unwrap().push(date);
            self.script.lock().unwrap().pop().unwrap_or(Ok(self.fallback))
        }
    }

    pub(crate) const BTC_PRICES: ReferencePrices = ReferencePrices {
        eth: 16.0,
        btc: 1.0,
        usd: 30000.0,
    };

    pub(crate) fn oracle_with(source: Arc<dyn PriceSource>) -> PriceOracle {
        let mut settings = PriceSettings::default();
        settings.throttle_delay_secs = 0;
        PriceOracle::new(source, PriceCache::new(Duration::from_secs(10)), &settings)
    }

    const NOW: i64 = 1_700_000_000;

    #[tokio::test]
    async fn test_live_price_is_cached() {
        let source = Arc::new(FakeSource::new(BTC_PRICES));
        let oracle = oracle_with(source.clone());

        let first = oracle.price_at("BTC", NOW - 60, NOW).await.unwrap();
        let second = oracle.price_at("BTC", NOW, NOW).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.decimals, 8);
        assert_eq!(first.price_in_usd, 30000.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.dates.lock().unwrap()[0], None);
    }

    #[tokio::test]
    async fn test_live_price_expires_after_ttl() {
        let source = Arc::new(FakeSource::new(BTC_PRICES));
        let oracle = PriceOracle::new(
            source.clone(),
            PriceCache::new(Duration::from_millis(50)),
            &PriceSettings::default(),
        );

        oracle.price_at("BTC", NOW, NOW).await.unwrap();
        oracle.price_at("BTC", NOW, NOW).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        oracle.price_at("BTC", NOW, NOW).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_old_timestamps_use_the_daily_price() {
        let source = Arc::new(FakeSource::new(BTC_PRICES));
        let oracle = oracle_with(source.clone());

        let two_days_ago = NOW - 2 * 86_400;
        oracle.price_at("BTC", two_days_ago, NOW).await.unwrap();
        oracle.price_at("BTC", two_days_ago + 60, NOW).await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let expected = DateTime::from_timestamp(two_days_ago, 0).unwrap().date_naive();
        assert_eq!(source.dates.lock().unwrap()[0], Some(expected));
    }

    #[tokio::test]
    async fn test_throttling_is_retried() {
        let source = Arc::new(FakeSource::scripted(
            BTC_PRICES,
            vec![Err(PriceError::Throttled), Err(PriceError::Throttled)],
        ));
        let oracle = oracle_with(source.clone());

        let price = oracle.price_at("BTC", NOW, NOW).await.unwrap();
        assert_eq!(price.price_in_usd, 30000.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_is_surfaced() {
        let source = Arc::new(FakeSource::scripted(
            BTC_PRICES,
            vec![Err(PriceError::Provider("boom".to_string()))],
        ));
        let oracle = oracle_with(source);

        let result = oracle.price_at("BTC", NOW, NOW).await;
        assert!(matches!(result, Err(PriceError::Provider(_))));
    }

    #[tokio::test]
    async fn test_invalid_prices_are_rejected() {
        let source = Arc::new(FakeSource::new(ReferencePrices {
            eth: f64::NAN,
            btc: 1.0,
            usd: 1.0,
        }));
        let oracle = oracle_with(source);

        let result = oracle.price_at("BTC", NOW, NOW).await;
        assert!(matches!(result, Err(PriceError::InvalidPrice { .. })));
    }

    #[tokio::test]
    async fn test_unknown_asset() {
        let oracle = oracle_with(Arc::new(FakeSource::new(BTC_PRICES)));
        let result = oracle.price_at("XYZ", NOW, NOW).await;
        assert!(matches!(result, Err(PriceError::UnknownAsset(_))));
        assert!(!oracle.knows("XYZ"));
        assert!(oracle.knows("BTC"));
    }

    #[test]
    fn test_coingecko_urls() {
        let source = CoinGeckoSource::new("https://api.coingecko.com/api/v3/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.url("bitcoin", None),
            format!("https://api.coingecko.com/api/v3/coins/bitcoin?{COINGECKO_PARAMS}")
        );
        let date = NaiveDate::from_ymd_opt(2021, 3, 7).unwrap();
        assert!(source.url("zcash", Some(date)).ends_with("&date=07-03-2021"));
    }
}
