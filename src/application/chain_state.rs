use crate::config::Registry;
use crate::domain::chain::{ChainState, ChainStateUpdate, ChainStatus};
use crate::domain::errors::RegistryError;
use crate::domain::identifiers::ChainId;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Latest-value cache of per-chain state. The cache is the only writer;
/// every consumer reads cloned snapshots, so readers never hold a write
/// lock and writers are never starved.
pub struct ChainStateCache {
    states: RwLock<HashMap<ChainId, ChainState>>,
    /// Block time per chain, for staleness classification.
    block_times: HashMap<ChainId, u64>,
}

impl ChainStateCache {
    /// One `ChainState` is created per configured chain at startup.
    pub fn new(registry: &Registry, now_ms: i64) -> Self {
        let mut states = HashMap::new();
        let mut block_times = HashMap::new();
        for chain in registry.chains() {
            states.insert(chain.id.clone(), ChainState::new(chain.id.clone(), now_ms));
            block_times.insert(chain.id.clone(), chain.block_time_ms);
        }
        Self {
            states: RwLock::new(states),
            block_times,
        }
    }

    pub fn get(&self, chain: &ChainId) -> Result<ChainState, RegistryError> {
        let guard = self
            .states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get(chain)
            .cloned()
            .ok_or_else(|| RegistryError::ChainUnknown {
                chain: chain.clone(),
            })
    }

    pub fn snapshot_all(&self) -> Vec<ChainState> {
        let guard = self
            .states
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.values().cloned().collect()
    }

    /// Apply an adapter update. Unknown chains are rejected, out-of-date
    /// updates (older than the stored one) are dropped.
    pub fn apply(&self, update: ChainStateUpdate) -> Result<(), RegistryError> {
        let mut guard = self
            .states
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = guard
            .get_mut(&update.chain)
            .ok_or_else(|| RegistryError::ChainUnknown {
                chain: update.chain.clone(),
            })?;

        if update.observed_at < state.last_update {
            debug!(
                "ChainStateCache: dropping out-of-date update for {} ({} < {})",
                update.chain, update.observed_at, state.last_update
            );
            return Ok(());
        }

        state.block_height = update.block_height;
        state.finalized_height = update.finalized_height;
        state.gas_price = update.gas_price;
        state.health_score = update.health_score.min(100);
        state.last_update = update.observed_at;
        state.status = Self::classify(update.health_score);
        Ok(())
    }

    /// Re-derive status from update age. Called on a cadence so a silent
    /// adapter degrades its chain without any new data arriving.
    pub fn refresh_staleness(&self, now_ms: i64) {
        let mut guard = self
            .states
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (chain, state) in guard.iter_mut() {
            let block_time = self.block_times.get(chain).copied().unwrap_or(12_000);
            let age = state.age_ms(now_ms).max(0) as u64;
            let next = if age > 10 * block_time {
                ChainStatus::Offline
            } else if age > 3 * block_time {
                ChainStatus::Degraded
            } else {
                Self::classify(state.health_score)
            };
            if next != state.status {
                warn!(
                    "ChainStateCache: {} status {:?} -> {:?} (update age {}ms)",
                    chain, state.status, next, age
                );
                state.status = next;
            }
        }
    }

    fn classify(health_score: u8) -> ChainStatus {
        match health_score {
            80..=100 => ChainStatus::Healthy,
            50..=79 => ChainStatus::Degraded,
            20..=49 => ChainStatus::Unstable,
            _ => ChainStatus::Offline,
        }
    }
}
