//! Snapshot collection over the chain adapter port, feeding the
//! cross-chain synchronizer.

use crate::application::synchronizer::SnapshotSource;
use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::sync::ChainSnapshot;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Collects per-chain snapshots by querying each chain adapter for the
/// configured vault address and asset set. Confidence degrades when the
/// chain's reported height has not advanced.
pub struct AdapterSnapshotSource {
    chains: HashMap<ChainId, Arc<dyn crate::domain::ports::ChainAdapter>>,
    assets: Vec<AssetId>,
    vault_address: String,
    last_heights: std::sync::Mutex<HashMap<ChainId, u64>>,
}

impl AdapterSnapshotSource {
    pub fn new(
        chains: Vec<Arc<dyn crate::domain::ports::ChainAdapter>>,
        assets: Vec<AssetId>,
        vault_address: String,
    ) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain(), c)).collect(),
            assets,
            vault_address,
            last_heights: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SnapshotSource for AdapterSnapshotSource {
    async fn snapshot(&self, chain: &ChainId, now_ms: i64) -> Result<ChainSnapshot, AdapterError> {
        let adapter = self.chains.get(chain).ok_or_else(|| AdapterError::Transport {
            reason: format!("no adapter for chain {chain}"),
        })?;

        let block_height = adapter.get_block_height().await?;
        let mut balances = HashMap::new();
        let mut value_usd = Decimal::ZERO;
        for asset in &self.assets {
            let balance = adapter.get_balance(asset, &self.vault_address).await?;
            value_usd += balance;
            balances.insert(asset.clone(), balance);
        }

        // A stalled height means the node may be serving a stale view.
        let advanced = {
            let mut heights = self
                .last_heights
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let advanced = heights
                .get(chain)
                .map(|prev| block_height > *prev)
                .unwrap_or(true);
            heights.insert(chain.clone(), block_height);
            advanced
        };

        Ok(ChainSnapshot {
            chain: chain.clone(),
            block_height,
            balances,
            value_usd,
            taken_at: now_ms,
            confidence: if advanced { 0.95 } else { 0.6 },
        })
    }
}
