use crate::application::asset_mapper::AssetMapper;
use crate::application::chain_state::ChainStateCache;
use crate::application::price_feed::PriceFeedBus;
use crate::application::risk_assessor::RiskAssessor;
use crate::config::{BridgeConfig, SharedConfig};
use crate::domain::bridge::RiskLevel;
use crate::domain::chain::ChainState;
use crate::domain::errors::EvaluationError;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::market::PriceSample;
use crate::domain::opportunity::{
    ArbitrageOpportunity, ExecutionPath, ExecutionStep, MevProtection, PathArena, PathId, StepId,
    StepKind,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fraction of the thinner side's depth a single opportunity may consume.
const DEPTH_FRACTION: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05

/// Fallback per-leg gas cost when the gas token has no fresh quote.
const FALLBACK_LEG_GAS_USD: Decimal = Decimal::from_parts(25, 0, 0, false, 0);

/// Gas units per step kind, used with the chain's gas price when a gas-token
/// quote is available.
const SWAP_GAS_UNITS: u64 = 180_000;
const BRIDGE_GAS_UNITS: u64 = 350_000;

/// Everything one scan produced: candidates in deterministic order plus the
/// arena holding their execution paths.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub paths: PathArena,
    /// Pairs that met the price criteria but had no connecting bridge.
    pub unroutable: Vec<EvaluationError>,
}

/// Scans the freshest price samples pairwise across enabled chains and
/// produces candidate opportunities with ranked execution paths.
pub struct ArbitrageDetector {
    config: SharedConfig,
    mapper: Arc<AssetMapper>,
    chain_state: Arc<ChainStateCache>,
    feed: Arc<PriceFeedBus>,
    risk: Arc<RiskAssessor>,
}

impl ArbitrageDetector {
    pub fn new(
        config: SharedConfig,
        mapper: Arc<AssetMapper>,
        chain_state: Arc<ChainStateCache>,
        feed: Arc<PriceFeedBus>,
        risk: Arc<RiskAssessor>,
    ) -> Self {
        Self {
            config,
            mapper,
            chain_state,
            feed,
            risk,
        }
    }

    /// Scan the full asset/chain matrix. Scanning the same snapshot twice
    /// yields the same candidate set in the same order.
    pub fn scan(&self, now_ms: i64) -> ScanResult {
        let assets: Vec<AssetId> = self.mapper.known_assets().to_vec();
        self.scan_assets(&assets, now_ms)
    }

    /// Scan a subset of assets (used by the coalescing agent).
    pub fn scan_assets(&self, assets: &[AssetId], now_ms: i64) -> ScanResult {
        let config = self.config.current();
        let chain_states: HashMap<ChainId, ChainState> = self
            .chain_state
            .snapshot_all()
            .into_iter()
            .map(|s| (s.chain.clone(), s))
            .collect();

        let mut result = ScanResult::default();
        for asset in assets {
            let mut samples: Vec<PriceSample> = config
                .arbitrage
                .enabled_chains
                .iter()
                .filter_map(|chain| self.feed.latest(asset, chain))
                .filter(|s| s.is_fresh(now_ms, config.validation.max_price_age_ms))
                .collect();
            samples.sort_by(|a, b| a.chain.cmp(&b.chain));
            if samples.len() < 2 {
                continue;
            }

            for i in 0..samples.len() {
                for j in (i + 1)..samples.len() {
                    match self.evaluate_pair(&samples[i], &samples[j], &chain_states, now_ms) {
                        Ok(Some((opportunity, paths))) => {
                            result.paths.merge(paths);
                            result.opportunities.push(opportunity);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            debug!("ArbitrageDetector: {err}");
                            result.unroutable.push(err);
                        }
                    }
                }
            }
        }

        // Most profitable first; opportunity ids differ per scan so the
        // stable key is (asset, source, target).
        result.opportunities.sort_by(|a, b| {
            b.net_profit
                .cmp(&a.net_profit)
                .then_with(|| a.asset.cmp(&b.asset))
                .then_with(|| a.source_chain.cmp(&b.source_chain))
                .then_with(|| a.target_chain.cmp(&b.target_chain))
        });
        result
    }

    fn evaluate_pair(
        &self,
        a: &PriceSample,
        b: &PriceSample,
        chain_states: &HashMap<ChainId, ChainState>,
        now_ms: i64,
    ) -> Result<Option<(ArbitrageOpportunity, PathArena)>, EvaluationError> {
        let config = self.config.current();

        // Source is the cheaper side.
        let (source, target) = if a.price_usd <= b.price_usd {
            (a, b)
        } else {
            (b, a)
        };

        let min_price = source.price_usd.min(target.price_usd);
        if min_price <= Decimal::ZERO {
            return Ok(None);
        }
        let pct_diff = (target.price_usd - source.price_usd) / min_price;
        // Exactly at threshold is included; strictly below is excluded.
        if pct_diff < config.arbitrage.effective_profit_threshold() {
            return Ok(None);
        }

        for sample in [source, target] {
            let usable = chain_states
                .get(&sample.chain)
                .map(|s| s.status.is_usable())
                .unwrap_or(false);
            if !usable {
                trace!(
                    "ArbitrageDetector: skipping {}@{}: chain not usable",
                    sample.asset, sample.chain
                );
                return Ok(None);
            }
            if sample.liquidity_usd < config.validation.min_liquidity_usd {
                return Ok(None);
            }
        }

        let size_usd = source.liquidity_usd.min(target.liquidity_usd) * DEPTH_FRACTION;
        let expected_profit = size_usd * pct_diff;

        let bridges = config
            .registry
            .eligible_bridges(&source.chain, &target.chain, &source.asset);
        if bridges.is_empty() {
            return Err(EvaluationError::NoPath {
                asset: source.asset.clone(),
                source_chain: source.chain.clone(),
                target: target.chain.clone(),
            });
        }

        let est_gas_cost = self.leg_gas_cost(&source.chain, chain_states, now_ms)
            + self.leg_gas_cost(&target.chain, chain_states, now_ms);

        let mut arena = PathArena::new();
        let mut ranked: Vec<ExecutionPath> = bridges
            .iter()
            .map(|bridge| {
                self.build_path(bridge, source, target, size_usd, expected_profit, &config.validation.mev_protection_threshold_usd)
            })
            .collect();
        // Tie-break: fees, then success probability, then time, then id.
        ranked.sort_by(|x, y| {
            x.total_fees_usd
                .cmp(&y.total_fees_usd)
                .then_with(|| {
                    y.success_probability
                        .partial_cmp(&x.success_probability)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| x.est_time_s.cmp(&y.est_time_s))
                .then_with(|| x.bridge.cmp(&y.bridge))
        });

        let bridge_fee = ranked[0].total_fees_usd;
        let execution_time_s = ranked[0].est_time_s;
        let best_success = ranked[0].success_probability;
        let path_ids: Vec<PathId> = ranked.into_iter().map(|p| arena.insert(p)).collect();

        let degraded = [source, target]
            .iter()
            .filter(|s| {
                chain_states
                    .get(&s.chain)
                    .map(|c| !matches!(c.status, crate::domain::chain::ChainStatus::Healthy))
                    .unwrap_or(true)
            })
            .count();
        let risk_score =
            (20.0 + (1.0 - best_success) * 50.0 + degraded as f64 * 15.0).clamp(0.0, 100.0);
        if risk_score > config.arbitrage.effective_max_risk_score() {
            return Ok(None);
        }

        // Confidence decays with sample age inside the freshness window.
        let max_age = config.validation.max_price_age_ms as f64;
        let worst_age = source.age_ms(now_ms).max(target.age_ms(now_ms)).max(0) as f64;
        let confidence = (1.0 - 0.5 * (worst_age / max_age)).clamp(0.0, 1.0);

        let opportunity = ArbitrageOpportunity::new(
            source.asset.clone(),
            source.chain.clone(),
            target.chain.clone(),
            source.price_usd,
            target.price_usd,
            pct_diff,
            expected_profit,
            est_gas_cost,
            bridge_fee,
            size_usd,
            execution_time_s,
            risk_score,
            confidence,
            now_ms,
            path_ids,
        );
        Ok(Some((opportunity, arena)))
    }

    /// Per-leg gas in USD: gas-token quote when the feed has one, otherwise
    /// a flat fallback.
    fn leg_gas_cost(
        &self,
        chain: &ChainId,
        chain_states: &HashMap<ChainId, ChainState>,
        now_ms: i64,
    ) -> Decimal {
        let config = self.config.current();
        let Some(state) = chain_states.get(chain) else {
            return FALLBACK_LEG_GAS_USD;
        };
        let Ok(chain_config) = config.registry.chain(chain) else {
            return FALLBACK_LEG_GAS_USD;
        };
        let Some(gas_quote) = self.feed.latest(&chain_config.gas_token, chain) else {
            return FALLBACK_LEG_GAS_USD;
        };
        if !gas_quote.is_fresh(now_ms, config.validation.max_price_age_ms) {
            return FALLBACK_LEG_GAS_USD;
        }

        // gas_price is in the gas token's smallest unit per gas unit.
        let scale = Decimal::from(10u64.pow(chain_config.native_decimals.min(18)));
        let units = Decimal::from(SWAP_GAS_UNITS);
        state.gas_price * units / scale * gas_quote.price_usd
    }

    fn build_path(
        &self,
        bridge: &BridgeConfig,
        source: &PriceSample,
        target: &PriceSample,
        size_usd: Decimal,
        expected_profit: Decimal,
        mev_threshold: &Decimal,
    ) -> ExecutionPath {
        let assessment = self.risk.assessment(&bridge.id);
        let (success_probability, risk_level) = match &assessment {
            Some(a) => (
                (a.overall_score / 100.0 * 0.98).clamp(0.0, 1.0),
                a.level,
            ),
            None => (0.95, RiskLevel::Low),
        };

        let protect = expected_profit >= *mev_threshold;
        let bridge_eta_s = 120;
        let steps = vec![
            ExecutionStep {
                id: StepId(0),
                kind: StepKind::Swap,
                chain: source.chain.clone(),
                protocol: "dex".to_string(),
                contract: String::new(),
                est_gas: Decimal::from(SWAP_GAS_UNITS),
                est_time_s: 20,
                dependencies: vec![],
                mev_protection: protect.then_some(MevProtection::PrivateMempool),
            },
            ExecutionStep {
                id: StepId(1),
                kind: StepKind::Bridge,
                chain: source.chain.clone(),
                protocol: bridge.id.as_str().to_string(),
                contract: String::new(),
                est_gas: Decimal::from(BRIDGE_GAS_UNITS),
                est_time_s: bridge_eta_s,
                dependencies: vec![StepId(0)],
                mev_protection: None,
            },
            ExecutionStep {
                id: StepId(2),
                kind: StepKind::Swap,
                chain: target.chain.clone(),
                protocol: "dex".to_string(),
                contract: String::new(),
                est_gas: Decimal::from(SWAP_GAS_UNITS),
                est_time_s: 20,
                dependencies: vec![StepId(1)],
                mev_protection: protect.then_some(MevProtection::PrivateMempool),
            },
        ];

        ExecutionPath {
            id: PathId::generate(),
            bridge: bridge.id.clone(),
            total_gas: steps.iter().map(|s| s.est_gas).sum(),
            est_time_s: steps.iter().map(|s| s.est_time_s).sum(),
            total_fees_usd: bridge.fee_for(size_usd),
            success_probability,
            risk_level,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Registry};
    use crate::domain::chain::ChainStateUpdate;
    use rust_decimal_macros::dec;

    const REGISTRY: &str = r#"
[[chains]]
id = "ethereum"
name = "Ethereum"
rpc_endpoint = "http://localhost:8545"
gas_token = "ETH"
block_time_ms = 12000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "polygon"
name = "Polygon"
rpc_endpoint = "http://localhost:8546"
gas_token = "MATIC"
block_time_ms = 2000
finality_depth = 128
native_decimals = 18

[[bridges]]
id = "stargate"
name = "Stargate"
supported_chains = ["ethereum", "polygon"]
fee_base_usd = 5.0
fee_variable_pct = 0.0006
supported_assets = ["USDC"]

[[assets]]
id = "USDC"

[[assets.tokens]]
chain = "ethereum"
address = "0xusdc-eth"
decimals = 6

[[assets.tokens]]
chain = "polygon"
address = "0xusdc-pol"
decimals = 6
"#;

    fn fixture() -> (ArbitrageDetector, Arc<PriceFeedBus>, Arc<ChainStateCache>) {
        let config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
        let shared = SharedConfig::new(config);
        let current = shared.current();

        let mapper = Arc::new(AssetMapper::new(&current.registry));
        let chain_state = Arc::new(ChainStateCache::new(&current.registry, 0));
        let feed = Arc::new(PriceFeedBus::new(256, current.validation.max_price_age_ms));
        let monitor = Arc::new(crate::application::bridge_monitor::BridgeMonitor::new(
            vec![],
            current.monitoring.clone(),
            None,
        ));
        let risk = Arc::new(RiskAssessor::new(monitor, current.risk.clone()));

        for chain in ["ethereum", "polygon"] {
            chain_state
                .apply(ChainStateUpdate {
                    chain: ChainId::new(chain),
                    block_height: 100,
                    finalized_height: 90,
                    gas_price: dec!(30),
                    health_score: 95,
                    observed_at: 0,
                })
                .unwrap();
        }

        let detector = ArbitrageDetector::new(shared, mapper, chain_state.clone(), feed.clone(), risk);
        (detector, feed, chain_state)
    }

    fn publish(feed: &PriceFeedBus, chain: &str, price: Decimal, liquidity: Decimal, ts: i64) {
        feed.publish(
            PriceSample {
                asset: AssetId::new("USDC"),
                chain: ChainId::new(chain),
                price_usd: price,
                liquidity_usd: liquidity,
                timestamp: ts,
                source: "test".to_string(),
            },
            ts,
        );
    }

    #[test]
    fn test_profitable_pair_detected() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(0.9950), dec!(1_000_000), 1_000);

        let result = detector.scan(1_500);
        assert_eq!(result.opportunities.len(), 1);
        let opp = &result.opportunities[0];
        assert_eq!(opp.source_chain, ChainId::new("polygon"));
        assert_eq!(opp.target_chain, ChainId::new("ethereum"));
        // ~0.5% dislocation
        assert!(opp.pct_diff > dec!(0.005) && opp.pct_diff < dec!(0.0051));
        assert_eq!(
            opp.net_profit,
            opp.expected_profit - opp.est_gas_cost - opp.bridge_fee
        );
        assert!(opp.net_profit > Decimal::ZERO);
        assert_eq!(opp.execution_paths.len(), 1);
        assert!(result.paths.get(opp.execution_paths[0]).is_some());
    }

    #[test]
    fn test_no_candidates_returns_empty() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(1.0000), dec!(1_000_000), 1_000);
        let result = detector.scan(1_500);
        assert!(result.opportunities.is_empty());
        assert!(result.unroutable.is_empty());
    }

    #[test]
    fn test_single_chain_yields_empty() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        assert!(detector.scan(1_500).opportunities.is_empty());
    }

    #[test]
    fn test_stale_sample_suppresses_candidate() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 31_000);
        // Polygon sample will be one past the age limit at scan time.
        publish(&feed, "polygon", dec!(0.9950), dec!(1_000_000), 999);
        let result = detector.scan(31_000);
        assert!(result.opportunities.is_empty());
    }

    #[test]
    fn test_threshold_boundary_inclusive() {
        let (detector, feed, _) = fixture();
        // Exactly 0.1% difference: 1.000 vs 1.001
        publish(&feed, "ethereum", dec!(1.001), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(1.000), dec!(1_000_000), 1_000);
        let at_threshold = detector.scan(1_000);
        assert_eq!(at_threshold.opportunities.len(), 1);

        // Strictly below threshold
        publish(&feed, "ethereum", dec!(1.0009), dec!(1_000_000), 2_000);
        publish(&feed, "polygon", dec!(1.0000), dec!(1_000_000), 2_000);
        let below = detector.scan(2_000);
        assert!(below.opportunities.is_empty());
    }

    #[test]
    fn test_insufficient_liquidity_excluded() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(0.9950), dec!(50_000), 1_000);
        assert!(detector.scan(1_500).opportunities.is_empty());
    }

    #[test]
    fn test_offline_chain_excluded() {
        let (detector, feed, chain_state) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(0.9950), dec!(1_000_000), 1_000);
        // Silence polygon long enough to go offline (10x 2s block time).
        chain_state.refresh_staleness(25_000);
        let result = detector.scan(25_000);
        assert!(result.opportunities.is_empty());
    }

    #[test]
    fn test_scan_is_deterministic() {
        let (detector, feed, _) = fixture();
        publish(&feed, "ethereum", dec!(1.0000), dec!(1_000_000), 1_000);
        publish(&feed, "polygon", dec!(0.9950), dec!(1_000_000), 1_000);

        let first = detector.scan(1_500);
        let second = detector.scan(1_500);
        assert_eq!(first.opportunities.len(), second.opportunities.len());
        let (a, b) = (&first.opportunities[0], &second.opportunities[0]);
        assert_eq!(a.pct_diff, b.pct_diff);
        assert_eq!(a.net_profit, b.net_profit);
        assert_eq!(a.source_chain, b.source_chain);
    }
}
