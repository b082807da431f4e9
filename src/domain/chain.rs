use crate::domain::identifiers::ChainId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operational status of a chain, derived from update staleness and health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Healthy,
    Degraded,
    Unstable,
    Offline,
}

impl ChainStatus {
    /// Detection and planning only consider chains in these states.
    pub fn is_usable(&self) -> bool {
        matches!(self, ChainStatus::Healthy | ChainStatus::Degraded)
    }
}

/// Latest observed state of one configured chain.
///
/// Created once at startup per configured chain and mutated only by the
/// `ChainStateCache`; everyone else works with clones.
#[derive(Debug, Clone, Serialize)]
pub struct ChainState {
    pub chain: ChainId,
    pub block_height: u64,
    pub finalized_height: u64,
    /// Milliseconds since epoch of the last applied update.
    pub last_update: i64,
    /// Gas price in the chain's gas token, at native decimals.
    pub gas_price: Decimal,
    /// Health in [0, 100].
    pub health_score: u8,
    pub status: ChainStatus,
}

impl ChainState {
    pub fn new(chain: ChainId, now_ms: i64) -> Self {
        Self {
            chain,
            block_height: 0,
            finalized_height: 0,
            last_update: now_ms,
            gas_price: Decimal::ZERO,
            health_score: 100,
            status: ChainStatus::Healthy,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_update
    }
}

/// An update delivered by an external chain adapter.
#[derive(Debug, Clone)]
pub struct ChainStateUpdate {
    pub chain: ChainId,
    pub block_height: u64,
    pub finalized_height: u64,
    pub gas_price: Decimal,
    /// Health in [0, 100] as reported by the adapter probe.
    pub health_score: u8,
    pub observed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_states() {
        assert!(ChainStatus::Healthy.is_usable());
        assert!(ChainStatus::Degraded.is_usable());
        assert!(!ChainStatus::Unstable.is_usable());
        assert!(!ChainStatus::Offline.is_usable());
    }

    #[test]
    fn test_new_state_starts_healthy() {
        let state = ChainState::new(ChainId::new("ethereum"), 1_000);
        assert_eq!(state.status, ChainStatus::Healthy);
        assert_eq!(state.health_score, 100);
        assert_eq!(state.age_ms(4_000), 3_000);
    }
}
