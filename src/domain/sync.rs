use crate::domain::identifiers::{AssetId, ChainId};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Point-in-time view of one chain, collected by the synchronizer.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSnapshot {
    pub chain: ChainId,
    pub block_height: u64,
    pub balances: HashMap<AssetId, Decimal>,
    pub value_usd: Decimal,
    pub taken_at: i64,
    /// Confidence in this snapshot, in [0, 1]; degraded chains report lower.
    pub confidence: f64,
}

impl ChainSnapshot {
    /// Deterministic hash over the snapshot's observable facts, used for
    /// cross-sync drift detection. Balances are hashed in sorted order.
    pub fn state_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chain.as_str().as_bytes());
        hasher.update(self.block_height.to_be_bytes());
        let mut assets: Vec<&AssetId> = self.balances.keys().collect();
        assets.sort();
        for asset in assets {
            hasher.update(asset.as_str().as_bytes());
            hasher.update(self.balances[asset].to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Which strategy the synchronizer ran on a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
}

/// Suggested recovery for a chain that failed to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    RpcRetry,
    Reroute,
    Wait,
}

/// Two chains disagreeing on the same fact, surfaced when confidence-weighted
/// resolution is not possible.
#[derive(Debug, Clone, Serialize)]
pub struct SyncConflict {
    pub asset: AssetId,
    pub chain_a: ChainId,
    pub chain_b: ChainId,
    pub value_a: Decimal,
    pub value_b: Decimal,
    pub confidence_a: f64,
    pub confidence_b: f64,
}

impl SyncConflict {
    pub fn total_confidence(&self) -> f64 {
        self.confidence_a + self.confidence_b
    }

    /// Confidence-weighted average of the two views. Only meaningful when
    /// total confidence met the consensus threshold.
    pub fn weighted_value(&self) -> Decimal {
        let total = self.total_confidence();
        if total <= 0.0 {
            return Decimal::ZERO;
        }
        let wa = Decimal::try_from(self.confidence_a / total).unwrap_or(Decimal::ZERO);
        let wb = Decimal::try_from(self.confidence_b / total).unwrap_or(Decimal::ZERO);
        self.value_a * wa + self.value_b * wb
    }
}

/// Aggregate outcome of one synchronization round.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSyncState {
    pub last_sync_ts: i64,
    pub mode: SyncMode,
    /// Largest per-chain timestamp drift observed in this round.
    pub max_drift_ms: i64,
    pub per_chain_hashes: HashMap<ChainId, String>,
    pub consensus_scores: HashMap<ChainId, f64>,
    /// Relative value-conservation error against the previous round.
    pub conservation_error: Decimal,
    pub healthy_chains: usize,
    pub failed_chains: HashMap<ChainId, RecoveryStrategy>,
}

impl GlobalSyncState {
    pub fn empty(now_ms: i64) -> Self {
        Self {
            last_sync_ts: now_ms,
            mode: SyncMode::Full,
            max_drift_ms: 0,
            per_chain_hashes: HashMap::new(),
            consensus_scores: HashMap::new(),
            conservation_error: Decimal::ZERO,
            healthy_chains: 0,
            failed_chains: HashMap::new(),
        }
    }
}
