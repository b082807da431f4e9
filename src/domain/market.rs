use crate::domain::identifiers::{AssetId, ChainId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One timestamped price observation for an (asset, chain) pair.
///
/// Immutable after creation. The feed bus keeps only the freshest sample per
/// key and discards anything older than `validation.max_price_age`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub asset: AssetId,
    pub chain: ChainId,
    pub price_usd: Decimal,
    /// Depth available around the quoted price.
    pub liquidity_usd: Decimal,
    /// Milliseconds since epoch at the source.
    pub timestamp: i64,
    pub source: String,
}

impl PriceSample {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp
    }

    pub fn is_fresh(&self, now_ms: i64, max_age_ms: i64) -> bool {
        self.age_ms(now_ms) <= max_age_ms
    }

    /// Key under which the bus stores the latest sample.
    pub fn key(&self) -> (AssetId, ChainId) {
        (self.asset.clone(), self.chain.clone())
    }
}
