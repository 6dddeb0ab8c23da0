use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ClassifyError;

/// `BTC/toEthereum`, `BTC/fromEthereum`
static SELECTOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]+)/(from|to)(.+)$").expect("valid selector regex"));

/// `BTC0Btc2Eth`: asset, origin chain, destination chain.
static LEGACY_SELECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)0([A-Za-z]+)2([A-Za-z]+)$").expect("valid legacy selector regex")
});

/// Short chain names used by legacy selectors.
const LEGACY_CHAIN_ALIASES: &[(&str, &str)] = &[("Eth", "Ethereum")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Asset locked on its origin chain and issued on `chain`.
    Mint,
    /// Issued representation on `chain` destroyed and the asset released.
    Burn,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Mint => f.write_str("MINT"),
            Direction::Burn => f.write_str("BURN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub asset: String,
    /// Chain the bridged representation lives on.
    pub chain: String,
    pub direction: Direction,
}

/// Map a transaction selector to the asset, chain and direction it concerns.
pub fn parse_selector(selector: &str) -> Result<Classification, ClassifyError> {
    if let Some(caps) = SELECTOR_RE.captures(selector) {
        let direction = if &caps[2] == "to" {
            Direction::Mint
        } else {
            Direction::Burn
        };
        return Ok(Classification {
            asset: caps[1].to_uppercase(),
            chain: caps[3].to_string(),
            direction,
        });
    }

    if let Some(caps) = LEGACY_SELECTOR_RE.captures(selector) {
        let (asset, from, to) = (&caps[1], &caps[2], &caps[3]);
        let is_mint = asset == from.to_uppercase();
        let chain = if is_mint { to } else { from };
        return Ok(Classification {
            asset: asset.to_uppercase(),
            chain: legacy_chain_name(chain).to_string(),
            direction: if is_mint {
                Direction::Mint
            } else {
                Direction::Burn
            },
        });
    }

    Err(ClassifyError::UnrecognizedSelector(selector.to_string()))
}

fn legacy_chain_name(alias: &str) -> &str {
    LEGACY_CHAIN_ALIASES
        .iter()
        .find(|(short, _)| *short == alias)
        .map(|(_, full)| *full)
        .unwrap_or(alias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_selector_is_a_mint() {
        assert_eq!(
            parse_selector("BTC/toEthereum").unwrap(),
            Classification {
                asset: "BTC".to_string(),
                chain: "Ethereum".to_string(),
                direction: Direction::Mint,
            }
        );
    }

    #[test]
    fn test_from_selector_is_a_burn() {
        assert_eq!(
            parse_selector("BTC/fromEthereum").unwrap(),
            Classification {
                asset: "BTC".to_string(),
                chain: "Ethereum".to_string(),
                direction: Direction::Burn,
            }
        );
    }

    #[test]
    fn test_unrecognized_selector_fails() {
        assert_eq!(
            parse_selector("not-a-selector"),
            Err(ClassifyError::UnrecognizedSelector("not-a-selector".to_string()))
        );
        assert!(parse_selector("btc/toEthereum").is_err());
        assert!(parse_selector("").is_err());
    }

    #[test]
    fn test_legacy_mint_uses_aliased_destination() {
        let parsed = parse_selector("BTC0Btc2Eth").unwrap();
        assert_eq!(parsed.asset, "BTC");
        assert_eq!(parsed.chain, "Ethereum");
        assert_eq!(parsed.direction, Direction::Mint);
    }

    #[test]
    fn test_legacy_burn_uses_aliased_origin() {
        let parsed = parse_selector("ZEC0Eth2Zec").unwrap();
        assert_eq!(parsed.asset, "ZEC");
        assert_eq!(parsed.chain, "Ethereum");
        assert_eq!(parsed.direction, Direction::Burn);
    }

    #[test]
    fn test_unknown_legacy_chain_is_kept() {
        let parsed = parse_selector("BTC0Btc2Bsc").unwrap();
        assert_eq!(parsed.chain, "Bsc");
    }
}
