use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::decimal_string;

/// A block decoded from the node's encoding, before its transaction hashes
/// are resolved.
///
/// `timestamp` is unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub height: u64,
    pub timestamp: i64,
    pub transactions: Vec<BlockTx>,
}

/// A block with every transaction it references.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub height: u64,
    pub timestamp: i64,
    pub transactions: Vec<ChainTransaction>,
}

/// A block body entry: older nodes list hashes, newer ones embed the transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BlockTx {
    Hash(String),
    Full(ChainTransaction),
}

impl BlockTx {
    pub fn hash(&self) -> &str {
        match self {
            BlockTx::Hash(hash) => hash,
            BlockTx::Full(tx) => &tx.hash,
        }
    }
}

/// A cross-chain transaction as returned by the node.
///
/// `in` and `out` stay untyped: each protocol version reads its own fields
/// from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub hash: String,
    #[serde(default)]
    pub selector: Option<String>,
    /// Legacy nodes carry the selector in `to`.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "in", default)]
    pub input: Value,
    #[serde(rename = "out", default)]
    pub output: Option<Value>,
}

// ============================================
// Block state
// ============================================

/// Aggregate chain state as of the latest block, keyed by asset.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct StateSummary(pub BTreeMap<String, AssetState>);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssetState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub minted: Vec<MintedAmount>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fees: AssetFees,
}

/// Amount of an asset currently minted on one chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MintedAmount {
    #[serde(with = "decimal_string")]
    pub amount: BigDecimal,
    pub chain: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AssetFees {
    #[serde(default, deserialize_with = "null_as_default")]
    pub epochs: Vec<EpochFee>,
    #[serde(with = "decimal_string", default = "BigDecimal::zero")]
    pub unassigned: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochFee {
    #[serde(with = "decimal_string")]
    pub amount: BigDecimal,
    #[serde(with = "decimal_string", default = "BigDecimal::zero")]
    pub epoch: BigDecimal,
    #[serde(with = "decimal_string", default = "BigDecimal::zero")]
    pub num_nodes: BigDecimal,
}

impl StateSummary {
    pub fn asset(&self, asset: &str) -> Option<&AssetState> {
        self.0.get(asset)
    }

    /// Authoritative minted balance of `asset` on `chain`, if reported.
    pub fn minted_on(&self, asset: &str, chain: &str) -> Option<&BigDecimal> {
        self.asset(asset)?
            .minted
            .iter()
            .find(|m| m.chain == chain)
            .map(|m| &m.amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AssetState)> {
        self.0.iter()
    }
}

impl AssetFees {
    /// Fees collected over all epochs plus those not yet assigned to one.
    pub fn total(&self) -> BigDecimal {
        self.epochs
            .iter()
            .fold(self.unassigned.clone(), |acc, epoch| acc + &epoch.amount)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_decimal;
    use serde_json::json;

    #[test]
    fn test_state_summary_from_node_json() {
        let summary: StateSummary = serde_json::from_value(json!({
            "BTC": {
                "minted": [
                    { "amount": "150000000", "chain": "Ethereum" },
                    { "amount": "25000000", "chain": "Solana" }
                ],
                "fees": {
                    "epochs": [
                        { "amount": "1000", "epoch": "3", "numNodes": "12" },
                        { "amount": "500", "epoch": "4", "numNodes": "13" }
                    ],
                    "unassigned": "250"
                },
                "gasLimit": "400000"
            },
            "System": { "epoch": { "hash": "abc" } }
        }))
        .unwrap();

        assert_eq!(
            summary.minted_on("BTC", "Solana"),
            Some(&parse_decimal("25000000").unwrap())
        );
        assert_eq!(summary.minted_on("BTC", "Fantom"), None);
        assert_eq!(
            summary.asset("BTC").unwrap().fees.total(),
            parse_decimal("1750").unwrap()
        );
        assert!(summary.asset("System").unwrap().minted.is_empty());
    }

    #[test]
    fn test_block_tx_accepts_hashes_and_embedded_transactions() {
        let txs: Vec<BlockTx> = serde_json::from_value(json!([
            "aGFzaA",
            { "hash": "ZW1iZWRkZWQ", "selector": "BTC/toEthereum", "in": {}, "out": { "amount": "1" } }
        ]))
        .unwrap();

        assert!(matches!(&txs[0], BlockTx::Hash(h) if h == "aGFzaA"));
        assert_eq!(txs[1].hash(), "ZW1iZWRkZWQ");
    }
}
