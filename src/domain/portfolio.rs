use crate::domain::coordination::TxId;
use crate::domain::identifiers::{AssetId, ChainId};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// A (chain, asset) balance owned exclusively by the portfolio coordinator.
///
/// A position is modified only while the coordinator holds its lock, and
/// `balance` always covers the sum of amounts reserved by pending operations.
#[derive(Debug, Clone, Serialize)]
pub struct AssetPosition {
    pub chain: ChainId,
    pub asset: AssetId,
    pub balance: Decimal,
    pub value_usd: Decimal,
    pub is_locked: bool,
    /// Transaction currently holding the positional lock, when locked.
    pub lock_owner: Option<TxId>,
    pub pending_ops: Vec<Uuid>,
    pub last_update: i64,
}

impl AssetPosition {
    pub fn new(chain: ChainId, asset: AssetId, balance: Decimal, value_usd: Decimal, now_ms: i64) -> Self {
        Self {
            chain,
            asset,
            balance,
            value_usd,
            is_locked: false,
            lock_owner: None,
            pending_ops: Vec::new(),
            last_update: now_ms,
        }
    }

    pub fn key(&self) -> (ChainId, AssetId) {
        (self.chain.clone(), self.asset.clone())
    }
}

/// Derived read-only view over all positions, cached by the coordinator for
/// at most 30 seconds.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub total_value_usd: Decimal,
    pub positions: Vec<AssetPosition>,
    /// Fraction of total value per chain; sums to 1 when total > 0.
    pub actual_distribution: HashMap<ChainId, Decimal>,
    pub target_distribution: HashMap<ChainId, Decimal>,
    pub rebalance_needed: bool,
    /// Allocation efficiency in [0, 100]: 100 means on-target.
    pub efficiency: f64,
    pub computed_at: i64,
}

impl PortfolioView {
    pub fn empty(now_ms: i64) -> Self {
        Self {
            total_value_usd: Decimal::ZERO,
            positions: Vec::new(),
            actual_distribution: HashMap::new(),
            target_distribution: HashMap::new(),
            rebalance_needed: false,
            efficiency: 100.0,
            computed_at: now_ms,
        }
    }

    /// Build the derived view from a position snapshot and target weights.
    pub fn compute(
        positions: Vec<AssetPosition>,
        target_distribution: HashMap<ChainId, Decimal>,
        rebalance_threshold: Decimal,
        now_ms: i64,
    ) -> Self {
        let total: Decimal = positions.iter().map(|p| p.value_usd).sum();
        if total <= Decimal::ZERO {
            return Self {
                target_distribution,
                ..Self::empty(now_ms)
            };
        }

        let mut per_chain: HashMap<ChainId, Decimal> = HashMap::new();
        for p in &positions {
            *per_chain.entry(p.chain.clone()).or_default() += p.value_usd;
        }
        let actual: HashMap<ChainId, Decimal> =
            per_chain.into_iter().map(|(c, v)| (c, v / total)).collect();

        // Total absolute deviation from target, over all chains on either side.
        let mut deviation = Decimal::ZERO;
        let mut chains: Vec<&ChainId> = actual.keys().chain(target_distribution.keys()).collect();
        chains.sort();
        chains.dedup();
        for chain in chains {
            let a = actual.get(chain).copied().unwrap_or(Decimal::ZERO);
            let t = target_distribution.get(chain).copied().unwrap_or(Decimal::ZERO);
            deviation += (a - t).abs();
        }

        let max_drift = actual
            .iter()
            .map(|(c, a)| {
                let t = target_distribution.get(c).copied().unwrap_or(Decimal::ZERO);
                (*a - t).abs()
            })
            .max()
            .unwrap_or(Decimal::ZERO);

        // Half the L1 distance is the fraction of value sitting on the wrong
        // chain; efficiency is its complement on a 0-100 scale.
        let misplaced = deviation / Decimal::TWO;
        let efficiency = (Decimal::ONE_HUNDRED * (Decimal::ONE - misplaced))
            .max(Decimal::ZERO)
            .to_f64()
            .unwrap_or(0.0);

        Self {
            total_value_usd: total,
            positions,
            rebalance_needed: !target_distribution.is_empty() && max_drift > rebalance_threshold,
            actual_distribution: actual,
            target_distribution,
            efficiency,
            computed_at: now_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.computed_at > ttl_ms
    }
}
