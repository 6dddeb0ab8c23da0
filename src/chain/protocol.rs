use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use futures::future::join_all;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    client::ChainClient,
    types::{Block, BlockTx, ChainTransaction, RawBlock},
};
use crate::{
    error::{PayloadError, RpcError},
    utils::{is_raw_amount, parse_decimal},
};

/// Protocol generation of a settlement network.
///
/// Each generation encodes blocks, selectors and transaction payloads
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "v0.2")]
    Legacy,
    #[serde(rename = "v0.3")]
    Current,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Legacy => f.write_str("v0.2"),
            ProtocolVersion::Current => f.write_str("v0.3"),
        }
    }
}

/// Amount moved by a mint or burn, in the asset's smallest unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPayload {
    pub amount: BigDecimal,
    /// The transaction was reverted on the destination and moved nothing.
    pub reverted: bool,
}

impl TransferPayload {
    fn inert() -> Self {
        Self {
            amount: BigDecimal::from(0),
            reverted: true,
        }
    }
}

/// Per-generation decoding of blocks and transactions.
///
/// The sync engine is generic over this strategy; it is picked once per
/// stream with [`protocol_for`].
#[async_trait]
pub trait Protocol: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Normalize a block as returned by the node.
    fn decode_block(&self, raw: Value) -> Result<RawBlock, RpcError>;

    /// The selector string identifying asset, chain and direction.
    fn selector<'a>(&self, tx: &'a ChainTransaction) -> Option<&'a str>;

    fn unmarshal_mint(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError>;

    fn unmarshal_burn(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError>;

    async fn fetch_head(&self, client: &dyn ChainClient) -> Result<RawBlock, RpcError> {
        self.decode_block(client.head().await?)
    }

    /// Fetch a batch of blocks and resolve every transaction they reference.
    ///
    /// Transactions the node no longer knows about are skipped.
    async fn fetch_batch(
        &self,
        client: &dyn ChainClient,
        from: u64,
        count: u64,
    ) -> Result<Vec<Block>, RpcError> {
        let raw_blocks = client.blocks(from, count).await?;

        let mut blocks = Vec::with_capacity(raw_blocks.len());
        for raw in raw_blocks {
            let raw = self.decode_block(raw)?;
            let transactions = resolve_transactions(client, raw.transactions).await?;
            blocks.push(Block {
                height: raw.height,
                timestamp: raw.timestamp,
                transactions,
            });
        }
        Ok(blocks)
    }
}

async fn resolve_transactions(
    client: &dyn ChainClient,
    entries: Vec<BlockTx>,
) -> Result<Vec<ChainTransaction>, RpcError> {
    let lookups = entries.into_iter().map(|entry| async move {
        match entry {
            BlockTx::Full(tx) => Ok(Some(tx)),
            BlockTx::Hash(hash) => match client.transaction(&hash).await {
                Ok(tx) => Ok(Some(tx)),
                Err(RpcError::NotFound(reason)) => {
                    warn!("Skipping transaction {}: {}", hash, reason);
                    Ok(None)
                }
                Err(e) => Err(e),
            },
        }
    });

    let mut transactions = Vec::new();
    for result in join_all(lookups).await {
        if let Some(tx) = result? {
            transactions.push(tx);
        }
    }
    Ok(transactions)
}

pub fn protocol_for(version: ProtocolVersion) -> Arc<dyn Protocol> {
    match version {
        ProtocolVersion::Legacy => Arc::new(LegacyProtocol),
        ProtocolVersion::Current => Arc::new(CurrentProtocol),
    }
}

// ============================================
// v0.2
// ============================================

/// First generation: second-resolution timestamps, hash-only block bodies and
/// the selector carried in `to`.
pub struct LegacyProtocol;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBlock {
    height: Value,
    timestamp: Value,
    #[serde(default)]
    extrinsic_txs: Vec<BlockTx>,
}

#[async_trait]
impl Protocol for LegacyProtocol {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Legacy
    }

    fn decode_block(&self, raw: Value) -> Result<RawBlock, RpcError> {
        let block: LegacyBlock = serde_json::from_value(raw)
            .map_err(|e| RpcError::Decode(format!("v0.2 block: {e}")))?;
        Ok(RawBlock {
            height: integer(&block.height, "height")?,
            timestamp: integer(&block.timestamp, "timestamp")? as i64,
            transactions: block.extrinsic_txs,
        })
    }

    fn selector<'a>(&self, tx: &'a ChainTransaction) -> Option<&'a str> {
        tx.to.as_deref().or(tx.selector.as_deref())
    }

    /// A mint without an output, or with any revert marker, never executed.
    fn unmarshal_mint(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError> {
        match &tx.output {
            Some(out) if field(out, "revert").is_none() => Ok(TransferPayload {
                amount: amount(tx, out, "out.amount")?,
                reverted: false,
            }),
            _ => Ok(TransferPayload::inert()),
        }
    }

    fn unmarshal_burn(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError> {
        Ok(TransferPayload {
            amount: amount(tx, &tx.input, "in.amount")?,
            reverted: false,
        })
    }
}

// ============================================
// v0.3
// ============================================

/// Second generation: microsecond timestamps, transactions embedded per shard
/// and an explicit `selector`.
pub struct CurrentProtocol;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentBlock {
    height: Value,
    timestamp: Value,
    #[serde(default)]
    extrinsics: Option<Extrinsics>,
    #[serde(default)]
    extrinsic_txs: Vec<BlockTx>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Extrinsics {
    #[serde(default)]
    shard_txs: Option<ShardTxs>,
}

#[derive(Debug, Deserialize)]
struct ShardTxs {
    #[serde(default)]
    txs: std::collections::BTreeMap<String, Vec<BlockTx>>,
}

const MICROS_PER_SECOND: u64 = 1_000_000;

#[async_trait]
impl Protocol for CurrentProtocol {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::Current
    }

    fn decode_block(&self, raw: Value) -> Result<RawBlock, RpcError> {
        let block: CurrentBlock = serde_json::from_value(raw)
            .map_err(|e| RpcError::Decode(format!("v0.3 block: {e}")))?;

        let micros = integer(&block.timestamp, "timestamp")?;
        let mut transactions = block.extrinsic_txs;
        if let Some(shard_txs) = block.extrinsics.and_then(|e| e.shard_txs) {
            transactions.extend(shard_txs.txs.into_values().flatten());
        }

        Ok(RawBlock {
            height: integer(&block.height, "height")?,
            // Rounded to the nearest second.
            timestamp: ((micros + MICROS_PER_SECOND / 2) / MICROS_PER_SECOND) as i64,
            transactions,
        })
    }

    fn selector<'a>(&self, tx: &'a ChainTransaction) -> Option<&'a str> {
        tx.selector.as_deref().or(tx.to.as_deref())
    }

    fn unmarshal_mint(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError> {
        match &tx.output {
            Some(out) if !has_revert(out) => Ok(TransferPayload {
                amount: amount(tx, out, "out.amount")?,
                reverted: false,
            }),
            _ => Ok(TransferPayload::inert()),
        }
    }

    fn unmarshal_burn(&self, tx: &ChainTransaction) -> Result<TransferPayload, PayloadError> {
        match &tx.output {
            Some(out) if !has_revert(out) => Ok(TransferPayload {
                amount: amount(tx, &tx.input, "in.amount")?,
                reverted: false,
            }),
            _ => Ok(TransferPayload::inert()),
        }
    }
}

// ============================================
// Payload helpers
// ============================================

/// Look a field up directly or inside a packed `{t, v}` value.
fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    value
        .get(name)
        .or_else(|| value.get("v").and_then(|v| v.get(name)))
        .filter(|v| !v.is_null())
}

fn has_revert(out: &Value) -> bool {
    match field(out, "revert") {
        Some(Value::String(reason)) => !reason.is_empty(),
        Some(_) => true,
        None => false,
    }
}

fn amount(
    tx: &ChainTransaction,
    source: &Value,
    name: &'static str,
) -> Result<BigDecimal, PayloadError> {
    let value = field(source, "amount").ok_or_else(|| PayloadError::MissingField {
        hash: tx.hash.clone(),
        field: name,
    })?;

    let parsed = match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    };

    parsed.filter(is_raw_amount).ok_or_else(|| PayloadError::InvalidAmount {
        hash: tx.hash.clone(),
        value: value.to_string(),
    })
}

fn integer(value: &Value, name: &str) -> Result<u64, RpcError> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| RpcError::Decode(format!("invalid block {name}: {value}")))
}
