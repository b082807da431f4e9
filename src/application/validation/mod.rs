//! Opportunity validation pipeline: ordered, pure checks applied to every
//! candidate before it may be evaluated or executed. Check failures are
//! never retried; they terminate the candidate's evaluation path.

mod check_trait;
mod freshness_check;
mod gas_check;
mod mev_check;
mod reachability_check;
mod slippage_check;

pub use check_trait::{CheckContext, CheckResult, OpportunityCheck};
pub use freshness_check::FreshnessCheck;
pub use gas_check::GasHeadroomCheck;
pub use mev_check::MevCheck;
pub use reachability_check::BridgeReachabilityCheck;
pub use slippage_check::{SlippageCheck, simulate_slippage};

use crate::application::bridge_monitor::BridgeMonitor;
use crate::application::price_feed::PriceFeedBus;
use crate::config::SharedConfig;
use crate::domain::evaluation::ValidationReport;
use crate::domain::opportunity::{ArbitrageOpportunity, PathArena};
use std::sync::Arc;
use tracing::debug;

/// Confidence penalty per failed check.
const FAILURE_CONFIDENCE_PENALTY: f64 = 0.15;
const FAILURE_RISK_PENALTY: f64 = 10.0;

/// Runs the ordered check pipeline over candidates. Validation is
/// deterministic for identical inputs and batch mode preserves input order.
pub struct OpportunityValidator {
    config: SharedConfig,
    feed: Arc<PriceFeedBus>,
    monitor: Arc<BridgeMonitor>,
    checks: Vec<Box<dyn OpportunityCheck>>,
}

impl OpportunityValidator {
    pub fn new(config: SharedConfig, feed: Arc<PriceFeedBus>, monitor: Arc<BridgeMonitor>) -> Self {
        let mut checks: Vec<Box<dyn OpportunityCheck>> = vec![
            Box::new(FreshnessCheck),
            Box::new(SlippageCheck),
            Box::new(MevCheck),
            Box::new(GasHeadroomCheck),
            Box::new(BridgeReachabilityCheck),
        ];
        checks.sort_by_key(|c| c.order());
        Self {
            config,
            feed,
            monitor,
            checks,
        }
    }

    /// Validate one candidate against the current market view.
    pub fn validate(
        &self,
        opportunity: &ArbitrageOpportunity,
        paths: &PathArena,
        now_ms: i64,
    ) -> ValidationReport {
        let config = self.config.current();

        let Some(path) = opportunity
            .execution_paths
            .first()
            .and_then(|id| paths.get(*id))
        else {
            return ValidationReport {
                opportunity: opportunity.id,
                is_valid: false,
                reasons: vec!["no execution path".to_string()],
                adjusted_profit: opportunity.net_profit,
                risk_score: opportunity.risk_score,
                confidence: 0.0,
            };
        };

        let source_sample = self
            .feed
            .latest(&opportunity.asset, &opportunity.source_chain);
        let target_sample = self
            .feed
            .latest(&opportunity.asset, &opportunity.target_chain);
        let (Some(source_sample), Some(target_sample)) = (source_sample, target_sample) else {
            return ValidationReport {
                opportunity: opportunity.id,
                is_valid: false,
                reasons: vec!["price samples no longer available".to_string()],
                adjusted_profit: opportunity.net_profit,
                risk_score: opportunity.risk_score,
                confidence: 0.0,
            };
        };

        let bridge_status = self.monitor.status(&path.bridge);

        let mut reasons = Vec::new();
        let mut running_profit = opportunity.net_profit;
        let mut failures = 0u32;

        for check in &self.checks {
            let ctx = CheckContext {
                opportunity,
                path,
                source_sample: &source_sample,
                target_sample: &target_sample,
                bridge_status: bridge_status.as_ref(),
                running_profit,
                config: &config.validation,
                now_ms,
            };
            match check.check(&ctx) {
                CheckResult::Pass => {}
                CheckResult::PassAdjusted {
                    adjusted_profit,
                    note,
                } => {
                    debug!("{}: {} ({note})", check.name(), opportunity.id);
                    running_profit = adjusted_profit;
                }
                CheckResult::Fail(reason) => {
                    debug!("{}: rejected {}: {reason}", check.name(), opportunity.id);
                    reasons.push(reason);
                    failures += 1;
                }
            }
        }

        ValidationReport {
            opportunity: opportunity.id,
            is_valid: failures == 0,
            reasons,
            adjusted_profit: running_profit,
            risk_score: (opportunity.risk_score + failures as f64 * FAILURE_RISK_PENALTY)
                .clamp(0.0, 100.0),
            confidence: (opportunity.confidence - failures as f64 * FAILURE_CONFIDENCE_PENALTY)
                .clamp(0.0, 1.0),
        }
    }

    /// Batch validation preserving input order; identical inputs produce
    /// identical reports.
    pub fn validate_batch(
        &self,
        opportunities: &[ArbitrageOpportunity],
        paths: &PathArena,
        now_ms: i64,
    ) -> Vec<ValidationReport> {
        opportunities
            .iter()
            .map(|o| self.validate(o, paths, now_ms))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::ValidationConfig;
    use crate::domain::bridge::{BridgeStatus, RiskLevel};
    use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
    use crate::domain::market::PriceSample;
    use crate::domain::opportunity::{
        ArbitrageOpportunity, ExecutionPath, ExecutionStep, MevProtection, PathId, StepId, StepKind,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::CheckContext;

    /// Builder holding owned values so check tests can borrow a context.
    pub struct ContextFixture {
        pub opportunity: ArbitrageOpportunity,
        pub path: ExecutionPath,
        pub source_sample: PriceSample,
        pub target_sample: PriceSample,
        pub bridge_status: Option<BridgeStatus>,
        pub config: ValidationConfig,
    }

    pub fn context_fixture() -> ContextFixture {
        let asset = AssetId::new("USDC");
        let source_chain = ChainId::new("polygon");
        let target_chain = ChainId::new("ethereum");
        let bridge = BridgeId::new("stargate");

        let path = ExecutionPath {
            id: PathId::generate(),
            bridge: bridge.clone(),
            steps: vec![
                ExecutionStep {
                    id: StepId(0),
                    kind: StepKind::Swap,
                    chain: source_chain.clone(),
                    protocol: "dex".to_string(),
                    contract: String::new(),
                    est_gas: dec!(180000),
                    est_time_s: 20,
                    dependencies: vec![],
                    mev_protection: Some(MevProtection::PrivateMempool),
                },
                ExecutionStep {
                    id: StepId(1),
                    kind: StepKind::Bridge,
                    chain: source_chain.clone(),
                    protocol: "stargate".to_string(),
                    contract: String::new(),
                    est_gas: dec!(350000),
                    est_time_s: 120,
                    dependencies: vec![StepId(0)],
                    mev_protection: None,
                },
            ],
            total_gas: dec!(530000),
            total_fees_usd: dec!(35),
            est_time_s: 140,
            success_probability: 0.95,
            risk_level: RiskLevel::Low,
        };

        let opportunity = ArbitrageOpportunity::new(
            asset.clone(),
            source_chain.clone(),
            target_chain.clone(),
            dec!(0.9950),
            dec!(1.0000),
            dec!(0.005025),
            dec!(250),
            dec!(50),
            dec!(35),
            dec!(50_000),
            140,
            25.0,
            0.9,
            1_000,
            vec![path.id],
        );

        let sample = |chain: &ChainId, price: Decimal| PriceSample {
            asset: asset.clone(),
            chain: chain.clone(),
            price_usd: price,
            liquidity_usd: dec!(1_000_000),
            timestamp: 1_000,
            source: "test".to_string(),
        };

        let mut bridge_status = BridgeStatus::new(bridge);
        bridge_status.is_operational = true;
        bridge_status.last_check = 1_000;

        ContextFixture {
            opportunity,
            source_sample: sample(&source_chain, dec!(0.9950)),
            target_sample: sample(&target_chain, dec!(1.0000)),
            path,
            bridge_status: Some(bridge_status),
            config: ValidationConfig::default(),
        }
    }

    impl ContextFixture {
        pub fn context(&self, now_ms: i64) -> CheckContext<'_> {
            CheckContext {
                opportunity: &self.opportunity,
                path: &self.path,
                source_sample: &self.source_sample,
                target_sample: &self.target_sample,
                bridge_status: self.bridge_status.as_ref(),
                running_profit: self.opportunity.net_profit,
                config: &self.config,
                now_ms,
            }
        }

        pub fn set_size(&mut self, size: Decimal) {
            self.opportunity.size_usd = size;
        }

        pub fn set_expected_profit(&mut self, profit: Decimal) {
            self.opportunity.expected_profit = profit;
        }

        pub fn set_gas_cost(&mut self, gas: Decimal) {
            self.opportunity.est_gas_cost = gas;
        }

        pub fn set_target_liquidity(&mut self, liquidity: Decimal) {
            self.target_sample.liquidity_usd = liquidity;
        }

        pub fn strip_mev_protection(&mut self) {
            for step in &mut self.path.steps {
                step.mev_protection = None;
            }
        }

        pub fn set_bridge_operational(&mut self, operational: bool) {
            if let Some(status) = &mut self.bridge_status {
                status.is_operational = operational;
            }
        }

        pub fn clear_bridge_status(&mut self) {
            self.bridge_status = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bridge_monitor::BridgeMonitor;
    use crate::config::{Config, MonitoringConfig, Registry};
    use crate::domain::bridge::{BridgeHealthSample, BridgeStatus};
    use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
    use crate::domain::market::PriceSample;
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
"#;

    fn pipeline_fixture() -> (
        OpportunityValidator,
        test_support::ContextFixture,
        crate::domain::opportunity::PathArena,
    ) {
        let config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
        let shared = SharedConfig::new(config);
        let current = shared.current();

        let feed = Arc::new(PriceFeedBus::new(256, current.validation.max_price_age_ms));
        let monitor = Arc::new(BridgeMonitor::new(vec![], MonitoringConfig::default(), None));

        let fixture = test_support::context_fixture();

        for sample in [&fixture.source_sample, &fixture.target_sample] {
            feed.publish(sample.clone(), sample.timestamp);
        }

        let mut arena = crate::domain::opportunity::PathArena::new();
        arena.insert(fixture.path.clone());

        let validator = OpportunityValidator::new(shared, feed, monitor);
        (validator, fixture, arena)
    }

    fn register_bridge(validator: &OpportunityValidator, operational: bool, at: i64) {
        let bridge = BridgeId::new("stargate");
        validator
            .monitor
            .seed_status(BridgeStatus::new(bridge.clone()));
        validator.monitor.ingest_sample(
            &bridge,
            BridgeHealthSample {
                ts: at,
                is_operational: operational,
                response_time_ms: 100.0,
                errors: vec![],
            },
            None,
            at,
        );
    }

    #[test]
    fn test_valid_opportunity_passes_pipeline() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, true, 1_500);

        let report = validator.validate(&fixture.opportunity, &arena, 2_000);
        assert!(report.is_valid, "reasons: {:?}", report.reasons);
        assert!(report.adjusted_profit > rust_decimal::Decimal::ZERO);
        assert!(report.confidence > 0.8);
    }

    #[test]
    fn test_stale_market_rejected_with_reason() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, true, 59_000);

        let report = validator.validate(&fixture.opportunity, &arena, 60_000);
        assert!(!report.is_valid);
        assert!(report.reasons.iter().any(|r| r.contains("stale")));
        assert!(report.confidence < fixture.opportunity.confidence);
    }

    #[test]
    fn test_batch_preserves_order_and_is_idempotent() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, true, 1_500);

        let mut second = fixture.opportunity.clone();
        second.size_usd = dec!(10_000);
        let batch = vec![fixture.opportunity.clone(), second];

        let first_run = validator.validate_batch(&batch, &arena, 2_000);
        let second_run = validator.validate_batch(&batch, &arena, 2_000);

        assert_eq!(first_run.len(), 2);
        assert_eq!(first_run[0].opportunity, batch[0].id);
        assert_eq!(first_run[1].opportunity, batch[1].id);
        for (a, b) in first_run.iter().zip(second_run.iter()) {
            assert_eq!(a.is_valid, b.is_valid);
            assert_eq!(a.adjusted_profit, b.adjusted_profit);
            assert_eq!(a.reasons, b.reasons);
        }
    }

    #[test]
    fn test_down_bridge_rejected() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, false, 1_500);

        let report = validator.validate(&fixture.opportunity, &arena, 2_000);
        assert!(!report.is_valid);
        assert!(report.reasons.iter().any(|r| r.contains("operational")));
    }

    #[test]
    fn test_missing_sample_invalidates() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, true, 1_500);

        let mut moved = fixture.opportunity.clone();
        moved.asset = AssetId::new("DAI");
        let report = validator.validate(&moved, &arena, 2_000);
        assert!(!report.is_valid);
        assert_eq!(report.confidence, 0.0);
    }

    #[test]
    fn test_feed_lookup_uses_chains() {
        let (validator, fixture, arena) = pipeline_fixture();
        register_bridge(&validator, true, 1_500);

        // Publishing a newer, thinner target sample changes the verdict.
        validator.feed.publish(
            PriceSample {
                asset: AssetId::new("USDC"),
                chain: ChainId::new("ethereum"),
                price_usd: dec!(1.0),
                liquidity_usd: dec!(10_000),
                timestamp: 1_900,
                source: "test".to_string(),
            },
            1_900,
        );
        let report = validator.validate(&fixture.opportunity, &arena, 2_000);
        assert!(!report.is_valid);
        assert!(report.reasons.iter().any(|r| r.contains("slippage")));
    }
}
