//! Access to settlement network nodes.
//!
//! - [`client`] - the node contract and its JSON-RPC implementation
//! - [`protocol`] - per-generation block and payload decoding
//! - [`types`] - blocks, transactions and the block state summary

pub mod client;
pub mod protocol;
pub mod types;

pub use client::{ChainClient, RpcChainClient};
pub use protocol::{protocol_for, Protocol, ProtocolVersion, TransferPayload};
pub use types::{AssetState, Block, BlockTx, ChainTransaction, RawBlock, StateSummary};
