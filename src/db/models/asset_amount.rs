use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use super::AssetPrice;
use crate::{
    error::AggregateError,
    utils::{decimal_string, price_to_decimal, round_to, shift_decimals},
};

/// Decimal places kept for valuations in ETH and BTC.
const CRYPTO_PLACES: i64 = 8;
/// Decimal places kept for valuations in USD.
const FIAT_PLACES: i64 = 2;

/// An amount of an asset together with its reference-currency valuations.
///
/// `amount` is in the asset's smallest on-chain unit. The three valuations
/// are derived from it with the price that was current when it was recorded.
/// Fee entries carry no chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
    #[serde(with = "decimal_string")]
    pub amount: BigDecimal,
    #[serde(with = "decimal_string")]
    pub amount_in_eth: BigDecimal,
    #[serde(with = "decimal_string")]
    pub amount_in_btc: BigDecimal,
    #[serde(with = "decimal_string")]
    pub amount_in_usd: BigDecimal,
}

impl AssetAmount {
    /// Value a raw amount at the given price.
    ///
    /// Without a price the valuations are zero and only the raw amount is
    /// meaningful. A price with a non-representable figure is rejected.
    pub fn priced(
        asset: &str,
        chain: Option<&str>,
        amount: BigDecimal,
        price: Option<&AssetPrice>,
    ) -> Result<Self, AggregateError> {
        let (amount_in_eth, amount_in_btc, amount_in_usd) = match price {
            Some(price) => {
                if !price.is_valid() {
                    return Err(AggregateError::InvalidNumber {
                        field: "price",
                        context: format!("price of {}", price.asset),
                    });
                }
                let context = format!("price of {}", price.asset);
                let shifted = shift_decimals(&amount, price.decimals);
                let eth = price_to_decimal(price.price_in_eth, "price_in_eth", &context)?;
                let btc = price_to_decimal(price.price_in_btc, "price_in_btc", &context)?;
                let usd = price_to_decimal(price.price_in_usd, "price_in_usd", &context)?;
                (
                    round_to(&(&shifted * eth), CRYPTO_PLACES),
                    round_to(&(&shifted * btc), CRYPTO_PLACES),
                    round_to(&(&shifted * usd), FIAT_PLACES),
                )
            }
            None => (BigDecimal::zero(), BigDecimal::zero(), BigDecimal::zero()),
        };

        Ok(Self {
            asset: asset.to_string(),
            chain: chain.map(str::to_string),
            amount,
            amount_in_eth,
            amount_in_btc,
            amount_in_usd,
        })
    }

    /// Same asset and chain. Identifies an entry inside a snapshot list.
    pub fn same_key(&self, other: &AssetAmount) -> bool {
        self.asset == other.asset && self.chain == other.chain
    }

    /// Magnitude of every figure, used for volume.
    pub fn abs(&self) -> Self {
        Self {
            asset: self.asset.clone(),
            chain: self.chain.clone(),
            amount: self.amount.abs(),
            amount_in_eth: self.amount_in_eth.abs(),
            amount_in_btc: self.amount_in_btc.abs(),
            amount_in_usd: self.amount_in_usd.abs(),
        }
    }

    /// Negated figures, used for burns.
    pub fn negated(&self) -> Self {
        Self {
            asset: self.asset.clone(),
            chain: self.chain.clone(),
            amount: -&self.amount,
            amount_in_eth: -&self.amount_in_eth,
            amount_in_btc: -&self.amount_in_btc,
            amount_in_usd: -&self.amount_in_usd,
        }
    }

    /// Human readable key for log lines, `BTC/Ethereum`.
    pub fn label(&self) -> String {
        match &self.chain {
            Some(chain) => format!("{}/{}", self.asset, chain),
            None => self.asset.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_decimal;

    fn dec(s: &str) -> BigDecimal {
        parse_decimal(s).unwrap()
    }

    #[test]
    fn test_one_btc_at_thirty_thousand_usd() {
        let price = AssetPrice::new("BTC", 8, 16.5, 1.0, 30000.0);
        let amount =
            AssetAmount::priced("BTC", Some("Ethereum"), dec("100000000"), Some(&price)).unwrap();

        assert_eq!(amount.amount_in_usd.to_plain_string(), "30000.00");
        assert_eq!(amount.amount_in_btc.to_plain_string(), "1.00000000");
        assert_eq!(amount.amount_in_eth.to_plain_string(), "16.50000000");
        assert_eq!(amount.amount.to_plain_string(), "100000000");
    }

    #[test]
    fn test_valuations_round_half_up() {
        let price = AssetPrice::new("ZEC", 8, 0.0, 0.0, 0.125);
        let amount = AssetAmount::priced("ZEC", None, dec("100000000"), Some(&price)).unwrap();
        assert_eq!(amount.amount_in_usd.to_plain_string(), "0.13");
    }

    #[test]
    fn test_missing_price_values_at_zero() {
        let amount = AssetAmount::priced("DOGE", Some("Solana"), dec("5000"), None).unwrap();
        assert!(amount.amount_in_usd.is_zero());
        assert!(amount.amount_in_eth.is_zero());
        assert_eq!(amount.amount, dec("5000"));
    }

    #[test]
    fn test_nan_price_is_rejected() {
        let price = AssetPrice::new("BTC", 8, 16.5, f64::NAN, 30000.0);
        let result = AssetAmount::priced("BTC", Some("Ethereum"), dec("1"), Some(&price));
        assert!(matches!(result, Err(AggregateError::InvalidNumber { .. })));
    }

    #[test]
    fn test_serializes_figures_as_strings() {
        let amount = AssetAmount::priced("BTC", Some("Ethereum"), dec("250000000"), None).unwrap();
        let json = serde_json::to_value(&amount).unwrap();
        assert_eq!(json["amount"], "250000000");
        assert_eq!(json["chain"], "Ethereum");

        let back: AssetAmount = serde_json::from_value(json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_fee_entries_omit_chain() {
        let fee = AssetAmount::priced("BTC", None, dec("10"), None).unwrap();
        let json = serde_json::to_value(&fee).unwrap();
        assert!(json.get("chain").is_none());
        assert_eq!(fee.label(), "BTC");
    }
}
