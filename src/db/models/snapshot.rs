use bigdecimal::BigDecimal;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use super::{AssetAmount, AssetPrice};
use crate::{error::AggregateError, utils::bucket_timestamp};

/// Aggregated bridge activity for one bucket (PostgreSQL).
///
/// Primary Key: timestamp (bucket aligned)
///
/// Within each list an entry is unique by `(asset, chain)`; `prices` and
/// `fees` are unique by asset. `locked` and `prices` carry forward from the
/// previous bucket, `volume` and `fees` start empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub volume: Vec<AssetAmount>,
    pub locked: Vec<AssetAmount>,
    pub prices: Vec<AssetPrice>,
    pub fees: Vec<AssetAmount>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp: bucket_timestamp(timestamp),
            ..Default::default()
        }
    }

    /// Open a new bucket, carrying forward balances and prices from the
    /// closest earlier bucket.
    pub fn seeded(timestamp: i64, previous: Option<&Snapshot>) -> Self {
        let mut snapshot = Self::new(timestamp);
        if let Some(previous) = previous {
            snapshot.locked = previous.locked.clone();
            snapshot.prices = previous.prices.clone();
        }
        snapshot
    }

    // ============================================
    // Prices
    // ============================================

    pub fn price_of(&self, asset: &str) -> Option<&AssetPrice> {
        self.prices.iter().find(|p| p.asset == asset)
    }

    /// Insert or replace the price entry for `price.asset`.
    pub fn upsert_price(&mut self, price: AssetPrice) {
        match self.prices.iter_mut().find(|p| p.asset == price.asset) {
            Some(existing) => *existing = price,
            None => self.prices.push(price),
        }
    }

    // ============================================
    // Volume
    // ============================================

    pub fn volume_of(&self, asset: &str, chain: &str) -> Option<&AssetAmount> {
        find(&self.volume, asset, Some(chain))
    }

    /// Add the magnitude of `amount` to the volume entry for its asset and chain.
    ///
    /// An existing entry recorded while the asset had no price is re-valued
    /// first, so that the bucket total does not mix priced and unpriced flow.
    pub fn add_volume(
        &mut self,
        amount: &AssetAmount,
        price: Option<&AssetPrice>,
    ) -> Result<(), AggregateError> {
        let addition = amount.abs();

        let Some(index) = self.volume.iter().position(|v| v.same_key(amount)) else {
            self.volume.push(addition);
            return Ok(());
        };
        let existing = &mut self.volume[index];

        if price.is_some() && existing.amount.is_positive() && existing.amount_in_usd.is_zero() {
            *existing = AssetAmount::priced(
                &existing.asset,
                existing.chain.as_deref(),
                existing.amount.clone(),
                price,
            )?;
        }

        existing.amount += addition.amount;
        existing.amount_in_eth += addition.amount_in_eth;
        existing.amount_in_btc += addition.amount_in_btc;
        existing.amount_in_usd += addition.amount_in_usd;
        Ok(())
    }

    // ============================================
    // Locked
    // ============================================

    pub fn locked_of(&self, asset: &str, chain: &str) -> Option<&AssetAmount> {
        find(&self.locked, asset, Some(chain))
    }

    /// Apply a signed change to the locked balance and re-value the whole
    /// balance at `price`.
    pub fn add_locked(
        &mut self,
        amount: &AssetAmount,
        price: Option<&AssetPrice>,
    ) -> Result<(), AggregateError> {
        let Some(index) = self.locked.iter().position(|l| l.same_key(amount)) else {
            self.locked.push(amount.clone());
            return Ok(());
        };
        let existing = &mut self.locked[index];

        let balance: BigDecimal = &existing.amount + &amount.amount;
        *existing = AssetAmount::priced(&amount.asset, amount.chain.as_deref(), balance, price)?;
        Ok(())
    }

    /// Overwrite the locked balance with an authoritative figure.
    pub fn set_locked(&mut self, amount: AssetAmount) {
        upsert(&mut self.locked, amount);
    }

    // ============================================
    // Fees
    // ============================================

    pub fn fees_of(&self, asset: &str) -> Option<&AssetAmount> {
        find(&self.fees, asset, None)
    }

    /// Overwrite the accumulated fees of an asset.
    pub fn set_fees(&mut self, amount: AssetAmount) {
        upsert(&mut self.fees, amount);
    }
}

fn find<'a>(list: &'a [AssetAmount], asset: &str, chain: Option<&str>) -> Option<&'a AssetAmount> {
    list.iter().find(|a| a.asset == asset && a.chain.as_deref() == chain)
}

fn upsert(list: &mut Vec<AssetAmount>, amount: AssetAmount) {
    match list.iter_mut().find(|a| a.same_key(&amount)) {
        Some(existing) => *existing = amount,
        None => list.push(amount),
    }
}
