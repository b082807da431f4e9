use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::market::PriceSample;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Outcome of a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Stored,
    /// Older than `max_price_age` at publish time.
    DroppedStale,
    /// Older than the sample already stored for its key.
    DroppedOutOfOrder,
}

/// Fan-in of timestamped price samples.
///
/// Keeps the freshest sample per (asset, chain) and fans publishes out to
/// subscribers over a broadcast channel: delivery is at-least-once for live
/// subscribers, the publisher never blocks, and a slow subscriber loses the
/// oldest backlog first (lagged-receiver semantics).
pub struct PriceFeedBus {
    latest: RwLock<HashMap<(AssetId, ChainId), PriceSample>>,
    fanout: broadcast::Sender<PriceSample>,
    max_price_age_ms: i64,
}

impl PriceFeedBus {
    pub fn new(capacity: usize, max_price_age_ms: i64) -> Self {
        let (fanout, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: RwLock::new(HashMap::new()),
            fanout,
            max_price_age_ms,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceSample> {
        self.fanout.subscribe()
    }

    /// Filter, store and fan out one sample.
    pub fn publish(&self, sample: PriceSample, now_ms: i64) -> PublishOutcome {
        if !sample.is_fresh(now_ms, self.max_price_age_ms) {
            debug!(
                "PriceFeedBus: dropping stale sample for {}@{} (age {}ms)",
                sample.asset,
                sample.chain,
                sample.age_ms(now_ms)
            );
            return PublishOutcome::DroppedStale;
        }

        {
            let mut guard = self
                .latest
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match guard.get(&sample.key()) {
                Some(stored) if stored.timestamp >= sample.timestamp => {
                    return PublishOutcome::DroppedOutOfOrder;
                }
                _ => {
                    guard.insert(sample.key(), sample.clone());
                }
            }
        }

        // Send fails only when no subscriber exists, which is fine.
        let _ = self.fanout.send(sample);
        PublishOutcome::Stored
    }

    pub fn latest(&self, asset: &AssetId, chain: &ChainId) -> Option<PriceSample> {
        let guard = self
            .latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(&(asset.clone(), chain.clone())).cloned()
    }

    /// Freshest sample per key, restricted to samples still within age,
    /// sorted by (asset, chain) for deterministic iteration.
    pub fn snapshot(&self, now_ms: i64) -> Vec<PriceSample> {
        let guard = self
            .latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut samples: Vec<PriceSample> = guard
            .values()
            .filter(|s| s.is_fresh(now_ms, self.max_price_age_ms))
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.key().cmp(&b.key()));
        samples
    }

    /// Drop samples that have aged out of the freshness window.
    pub fn evict_stale(&self, now_ms: i64) -> usize {
        let mut guard = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = guard.len();
        guard.retain(|_, s| s.is_fresh(now_ms, self.max_price_age_ms));
        before - guard.len()
    }
}
