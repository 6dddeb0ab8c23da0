use serde::{Deserialize, Serialize};

/// Reference price of one asset in a snapshot.
///
/// `decimals` is the exponent of the asset's smallest on-chain unit; raw
/// amounts are divided by `10^decimals` before being valued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPrice {
    pub asset: String,
    pub decimals: u32,
    pub price_in_eth: f64,
    pub price_in_btc: f64,
    pub price_in_usd: f64,
}

impl AssetPrice {
    pub fn new(
        asset: impl Into<String>,
        decimals: u32,
        price_in_eth: f64,
        price_in_btc: f64,
        price_in_usd: f64,
    ) -> Self {
        Self {
            asset: asset.into(),
            decimals,
            price_in_eth,
            price_in_btc,
            price_in_usd,
        }
    }

    /// A price is usable only when none of its figures is NaN.
    pub fn is_valid(&self) -> bool {
        !self.price_in_eth.is_nan() && !self.price_in_btc.is_nan() && !self.price_in_usd.is_nan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_price_is_invalid() {
        assert!(AssetPrice::new("BTC", 8, 15.2, 1.0, 30000.0).is_valid());
        assert!(!AssetPrice::new("BTC", 8, f64::NAN, 1.0, 30000.0).is_valid());
        assert!(!AssetPrice::new("BTC", 8, 15.2, 1.0, f64::NAN).is_valid());
    }
}
