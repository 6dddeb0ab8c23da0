use std::{collections::BTreeSet, sync::Arc};

use anyhow::Result;
use log::{debug, error, info, warn};
use num_traits::Zero;
use rustc_hash::FxHashMap;

use super::{
    classifier::{parse_selector, Classification, Direction},
    price_oracle::PriceOracle,
};
use crate::{
    chain::{ChainTransaction, Protocol, StateSummary},
    db::models::{AssetAmount, AssetPrice, Snapshot},
    error::PriceError,
};

/// Prices resolved for one bucket, keyed by asset.
pub type PriceBook = FxHashMap<String, AssetPrice>;

/// Folds classified transactions and block state summaries into snapshots.
///
/// Prices are looked up with [`SnapshotAggregator::resolve_prices`] before a
/// bucket is opened, so folding itself never waits on the price provider.
pub struct SnapshotAggregator {
    stream: String,
    protocol: Arc<dyn Protocol>,
    oracle: Arc<PriceOracle>,
}

impl SnapshotAggregator {
    pub fn new(stream: impl Into<String>, protocol: Arc<dyn Protocol>, oracle: Arc<PriceOracle>) -> Self {
        Self {
            stream: stream.into(),
            protocol,
            oracle,
        }
    }

    fn classify(&self, tx: &ChainTransaction) -> Option<Classification> {
        let Some(selector) = self.protocol.selector(tx) else {
            warn!("[{}] Transaction {} has no selector", self.stream, tx.hash);
            return None;
        };
        match parse_selector(selector) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("[{}] {} in transaction {}", self.stream, e, tx.hash);
                None
            }
        }
    }

    /// Assets that folding `txs` and `state` will need a price for.
    ///
    /// Assets unknown to the price provider are left out.
    pub fn assets_in<'a>(
        &self,
        txs: impl IntoIterator<Item = &'a ChainTransaction>,
        state: Option<&StateSummary>,
    ) -> BTreeSet<String> {
        let mut assets: BTreeSet<String> = txs
            .into_iter()
            .filter_map(|tx| {
                let selector = self.protocol.selector(tx)?;
                parse_selector(selector).ok().map(|parsed| parsed.asset)
            })
            .collect();

        if let Some(state) = state {
            assets.extend(
                state
                    .iter()
                    .filter(|(_, s)| !s.minted.is_empty() || !s.fees.total().is_zero())
                    .map(|(asset, _)| asset.clone()),
            );
        }

        assets.retain(|asset| self.oracle.knows(asset));
        assets
    }

    /// Look up the price of each asset at `timestamp`.
    ///
    /// Failed lookups are logged and left out of the book; the snapshot then
    /// keeps whatever price it already carries.
    pub async fn resolve_prices(&self, assets: &BTreeSet<String>, timestamp: i64) -> PriceBook {
        let mut book = PriceBook::default();
        for asset in assets {
            match self.oracle.price(asset, timestamp).await {
                Ok(price) => {
                    book.insert(asset.clone(), price);
                }
                Err(PriceError::UnknownAsset(_)) => {
                    debug!("[{}] No price source for {}", self.stream, asset)
                }
                Err(e) => error!("[{}] Unable to fetch price of {}: {}", self.stream, asset, e),
            }
        }
        book
    }

    /// Apply one transaction to the snapshot of its bucket.
    ///
    /// Transactions that cannot be attributed are logged and skipped. When
    /// `state` is given, the locked balance of the transaction's asset and
    /// chain is taken from it instead of being adjusted incrementally.
    ///
    /// Errors only on invalid numbers, which must stop the stream.
    pub fn handle_transaction(
        &self,
        snapshot: &mut Snapshot,
        tx: &ChainTransaction,
        state: Option<&StateSummary>,
        prices: &PriceBook,
    ) -> Result<()> {
        let Some(parsed) = self.classify(tx) else {
            return Ok(());
        };

        let payload = match parsed.direction {
            Direction::Mint => self.protocol.unmarshal_mint(tx),
            Direction::Burn => self.protocol.unmarshal_burn(tx),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[{}] Skipping transaction: {}", self.stream, e);
                return Ok(());
            }
        };
        if payload.reverted {
            debug!("[{}] Transaction {} was reverted", self.stream, tx.hash);
            return Ok(());
        }

        let price = apply_price(snapshot, &parsed.asset, prices);
        let price = price.as_ref();

        let amount = AssetAmount::priced(&parsed.asset, Some(&parsed.chain), payload.amount, price)?;
        let amount = match parsed.direction {
            Direction::Mint => amount,
            Direction::Burn => amount.negated(),
        };

        snapshot.add_volume(&amount, price)?;

        let authoritative = state.and_then(|s| s.minted_on(&parsed.asset, &parsed.chain));
        match authoritative {
            Some(minted) => {
                let locked = AssetAmount::priced(&parsed.asset, Some(&parsed.chain), minted.clone(), price)?;
                info!(
                    "[{}] Updating {} locked amount to {} (${})",
                    self.stream,
                    locked.label(),
                    locked.amount,
                    locked.amount_in_usd
                );
                snapshot.set_locked(locked);
            }
            None => snapshot.add_locked(&amount, price)?,
        }

        info!(
            "[{}] [{}] {} {} {}",
            self.stream,
            amount.label(),
            parsed.direction,
            amount.amount.abs(),
            tx.hash
        );
        Ok(())
    }

    /// Overwrite locked balances and fees with the chain's own figures.
    ///
    /// Idempotent. Run once per head block after its transactions.
    pub fn handle_block_state(
        &self,
        snapshot: &mut Snapshot,
        state: &StateSummary,
        prices: &PriceBook,
    ) -> Result<()> {
        for (asset, asset_state) in state.iter() {
            let fees_total = asset_state.fees.total();
            if asset_state.minted.is_empty() && fees_total.is_zero() {
                continue;
            }

            let price = apply_price(snapshot, asset, prices);

            for minted in &asset_state.minted {
                let locked =
                    AssetAmount::priced(asset, Some(&minted.chain), minted.amount.clone(), price.as_ref())?;
                snapshot.set_locked(locked);
            }

            let fees = AssetAmount::priced(asset, None, fees_total, price.as_ref())?;
            snapshot.set_fees(fees);
        }
        Ok(())
    }
}

/// Record the resolved price of `asset` in the snapshot and return the price
/// now in force, which may be one carried over from an earlier bucket.
fn apply_price(snapshot: &mut Snapshot, asset: &str, prices: &PriceBook) -> Option<AssetPrice> {
    if let Some(price) = prices.get(asset) {
        snapshot.upsert_price(price.clone());
    }
    snapshot.price_of(asset).cloned()
}
