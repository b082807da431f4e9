use crate::application::chain_state::ChainStateCache;
use crate::config::SharedConfig;
use crate::domain::bridge::Severity;
use crate::domain::chain::ChainStatus;
use crate::domain::evaluation::{
    Bottleneck, ExecutionAlternative, FeasibilityLevel, FeasibilityReport, Urgency,
};
use crate::domain::opportunity::{ArbitrageOpportunity, ExecutionPath, StepKind};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;

/// Capital, gas and liquidity the caller can actually deploy right now.
#[derive(Debug, Clone)]
pub struct AvailableResources {
    pub capital_usd: Decimal,
    pub gas_usd: Decimal,
    pub liquidity_usd: Decimal,
}

/// Weight of an infrastructure dependency in the health blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    Critical,
    Important,
    Optional,
}

impl Criticality {
    fn weight(&self) -> f64 {
        match self {
            Criticality::Critical => 3.0,
            Criticality::Important => 2.0,
            Criticality::Optional => 1.0,
        }
    }
}

/// Health of one external dependency (RPC endpoint, feed, signer, ...).
#[derive(Debug, Clone)]
pub struct DependencyStatus {
    pub name: String,
    pub criticality: Criticality,
    pub healthy: bool,
}

/// Scores technical, resource, timing and infrastructure feasibility of
/// executing an opportunity, each in [0, 100], and surfaces bottlenecks with
/// concrete fallback shapes.
pub struct FeasibilityAnalyzer {
    config: SharedConfig,
    chain_state: Arc<ChainStateCache>,
}

impl FeasibilityAnalyzer {
    pub fn new(config: SharedConfig, chain_state: Arc<ChainStateCache>) -> Self {
        Self {
            config,
            chain_state,
        }
    }

    pub fn analyze(
        &self,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        resources: &AvailableResources,
        dependencies: &[DependencyStatus],
        now_ms: i64,
    ) -> FeasibilityReport {
        let mut bottlenecks = Vec::new();
        let mut alternatives = Vec::new();

        let technical = self.technical_score(opportunity, path, &mut bottlenecks);
        let resource = self.resource_score(opportunity, resources, &mut bottlenecks, &mut alternatives);
        let (timing, urgency) = self.timing_score(opportunity, path, now_ms, &mut bottlenecks, &mut alternatives);
        let infrastructure = self.infrastructure_score(opportunity, dependencies, &mut bottlenecks);

        if technical < 60.0 {
            alternatives.push(ExecutionAlternative::SplitExecution {
                chunks: (path.steps.len() as u32).max(2),
            });
        }

        bottlenecks.sort_by(|a, b| b.severity.cmp(&a.severity));

        let overall = FeasibilityReport::blend(technical, resource, timing, infrastructure);
        FeasibilityReport {
            opportunity: opportunity.id,
            technical,
            resource,
            timing,
            infrastructure,
            overall,
            level: FeasibilityLevel::from_score(overall),
            urgency,
            bottlenecks,
            alternatives,
        }
    }

    /// Path length, cross-chain hops and per-step execution risks.
    fn technical_score(
        &self,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        bottlenecks: &mut Vec<Bottleneck>,
    ) -> f64 {
        let mut score = 100.0;
        score -= 6.0 * (path.steps.len().saturating_sub(1)) as f64;
        score -= 10.0 * path.cross_chain_hops() as f64;

        for step in &path.steps {
            score -= match step.kind {
                StepKind::Swap => 4.0,     // contract failure
                StepKind::Bridge => 8.0,   // bridge delay
                StepKind::Deposit | StepKind::Withdraw => 2.0,
            };
        }

        // Thin confidence implies oracle disagreement risk.
        if opportunity.confidence < 0.7 {
            score -= 5.0;
            bottlenecks.push(Bottleneck {
                component: "oracle".to_string(),
                severity: Severity::Medium,
                description: "low confidence in input quotes".to_string(),
            });
        }

        if path.steps.len() > 5 {
            bottlenecks.push(Bottleneck {
                component: "path".to_string(),
                severity: Severity::Medium,
                description: format!("long execution path ({} steps)", path.steps.len()),
            });
        }

        score.clamp(0.0, 100.0)
    }

    /// Required vs available capital, gas and liquidity. A ratio of 2x or
    /// better scores full marks; below 1x is penalized severely.
    fn resource_score(
        &self,
        opportunity: &ArbitrageOpportunity,
        resources: &AvailableResources,
        bottlenecks: &mut Vec<Bottleneck>,
        alternatives: &mut Vec<ExecutionAlternative>,
    ) -> f64 {
        let config = self.config.current();
        let required_gas = opportunity.est_gas_cost * config.validation.simulation_gas_buffer;

        let components = [
            ("capital", opportunity.size_usd, resources.capital_usd),
            ("gas", required_gas, resources.gas_usd),
            ("liquidity", opportunity.size_usd, resources.liquidity_usd),
        ];

        let mut worst: f64 = 100.0;
        let mut worst_ratio = f64::MAX;
        for (name, required, available) in components {
            let required = required.to_f64().unwrap_or(f64::MAX).max(f64::MIN_POSITIVE);
            let available = available.to_f64().unwrap_or(0.0);
            let ratio = available / required;
            let component = Self::ratio_score(ratio);
            if component < 60.0 {
                bottlenecks.push(Bottleneck {
                    component: name.to_string(),
                    severity: if ratio < 1.0 {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    description: format!("{name} coverage ratio {ratio:.2}"),
                });
            }
            if component < worst {
                worst = component;
                worst_ratio = ratio;
            }
        }

        if worst_ratio < 1.0 {
            let factor = Decimal::try_from(worst_ratio.max(0.05)).unwrap_or(Decimal::ONE);
            alternatives.push(ExecutionAlternative::ReducedSize { factor });
        }

        worst
    }

    fn ratio_score(ratio: f64) -> f64 {
        if ratio >= 2.0 {
            100.0
        } else if ratio >= 1.0 {
            60.0 + 40.0 * (ratio - 1.0)
        } else {
            (60.0 * ratio * ratio).clamp(0.0, 59.0)
        }
    }

    /// Remaining execution window against the path's expected duration.
    fn timing_score(
        &self,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        now_ms: i64,
        bottlenecks: &mut Vec<Bottleneck>,
        alternatives: &mut Vec<ExecutionAlternative>,
    ) -> (f64, Urgency) {
        let config = self.config.current();
        let window_ms = config.arbitrage.max_execution_time_s as i64 * 1_000;
        let elapsed = (now_ms - opportunity.detected_at).max(0);
        let remaining_s = ((window_ms - elapsed) / 1_000).max(0) as f64;
        let needed_s = path.est_time_s.max(1) as f64;
        let ratio = remaining_s / needed_s;

        let urgency = if ratio < 1.5 {
            Urgency::Immediate
        } else if ratio < 2.5 {
            Urgency::Urgent
        } else if ratio < 4.0 {
            Urgency::Moderate
        } else {
            Urgency::Flexible
        };

        let score = if ratio >= 2.5 {
            100.0
        } else if ratio >= 1.0 {
            40.0 * ratio
        } else {
            // Window already shorter than the path needs.
            20.0 * ratio
        };

        if ratio < 1.0 {
            bottlenecks.push(Bottleneck {
                component: "timing".to_string(),
                severity: Severity::High,
                description: format!(
                    "window {remaining_s:.0}s shorter than execution {needed_s:.0}s"
                ),
            });
            alternatives.push(ExecutionAlternative::DelayedExecution {
                delay_s: needed_s as u64,
            });
        }

        (score.clamp(0.0, 100.0), urgency)
    }

    /// Worst-case network health across involved chains blended with
    /// criticality-weighted dependency health.
    fn infrastructure_score(
        &self,
        opportunity: &ArbitrageOpportunity,
        dependencies: &[DependencyStatus],
        bottlenecks: &mut Vec<Bottleneck>,
    ) -> f64 {
        let mut worst_health: f64 = 100.0;
        for chain in [&opportunity.source_chain, &opportunity.target_chain] {
            match self.chain_state.get(chain) {
                Ok(state) => {
                    let health = match state.status {
                        ChainStatus::Healthy => state.health_score as f64,
                        ChainStatus::Degraded => (state.health_score as f64).min(65.0),
                        ChainStatus::Unstable => 35.0,
                        ChainStatus::Offline => 0.0,
                    };
                    if health < worst_health {
                        worst_health = health;
                    }
                    if !state.status.is_usable() {
                        bottlenecks.push(Bottleneck {
                            component: format!("chain:{chain}"),
                            severity: Severity::Critical,
                            description: format!("chain {chain} is {:?}", state.status),
                        });
                    }
                }
                Err(_) => {
                    worst_health = 0.0;
                    bottlenecks.push(Bottleneck {
                        component: format!("chain:{chain}"),
                        severity: Severity::Critical,
                        description: format!("chain {chain} is not configured"),
                    });
                }
            }
        }

        let dependency_health = if dependencies.is_empty() {
            100.0
        } else {
            let total: f64 = dependencies.iter().map(|d| d.criticality.weight()).sum();
            let healthy: f64 = dependencies
                .iter()
                .filter(|d| d.healthy)
                .map(|d| d.criticality.weight())
                .sum();
            for dep in dependencies.iter().filter(|d| !d.healthy) {
                bottlenecks.push(Bottleneck {
                    component: dep.name.clone(),
                    severity: match dep.criticality {
                        Criticality::Critical => Severity::Critical,
                        Criticality::Important => Severity::High,
                        Criticality::Optional => Severity::Low,
                    },
                    description: format!("dependency {} unhealthy", dep.name),
                });
            }
            healthy / total * 100.0
        };

        (0.6 * worst_health + 0.4 * dependency_health).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Registry, SharedConfig};
    use crate::domain::chain::ChainStateUpdate;
    use crate::domain::evaluation::FeasibilityLevel;
    use crate::domain::identifiers::ChainId;
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
"#;

    fn fixture() -> (FeasibilityAnalyzer, crate::application::validation::test_support::ContextFixture) {
        let config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
        let shared = SharedConfig::new(config);
        let chain_state = Arc::new(ChainStateCache::new(&shared.current().registry, 0));
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
        let analyzer = FeasibilityAnalyzer::new(shared, chain_state);
        let fixture = crate::application::validation::test_support::context_fixture();
        (analyzer, fixture)
    }

    fn ample_resources() -> AvailableResources {
        AvailableResources {
            capital_usd: dec!(500_000),
            gas_usd: dec!(5_000),
            liquidity_usd: dec!(500_000),
        }
    }

    #[test]
    fn test_healthy_setup_scores_high() {
        let (analyzer, f) = fixture();
        let report = analyzer.analyze(&f.opportunity, &f.path, &ample_resources(), &[], 2_000);
        assert!(report.overall >= 80.0, "overall {}", report.overall);
        assert_eq!(report.level, FeasibilityLevel::High);
        assert!(report.bottlenecks.is_empty());
    }

    #[test]
    fn test_scarce_capital_penalized_with_alternative() {
        let (analyzer, f) = fixture();
        let resources = AvailableResources {
            capital_usd: dec!(20_000), // 0.4x of the 50k size
            gas_usd: dec!(5_000),
            liquidity_usd: dec!(500_000),
        };
        let report = analyzer.analyze(&f.opportunity, &f.path, &resources, &[], 2_000);
        assert!(report.resource < 60.0);
        assert!(
            report
                .alternatives
                .iter()
                .any(|a| matches!(a, ExecutionAlternative::ReducedSize { .. }))
        );
        assert!(report.bottlenecks.iter().any(|b| b.component == "capital"));
    }

    #[test]
    fn test_resource_ratio_bands() {
        assert_eq!(FeasibilityAnalyzer::ratio_score(2.5), 100.0);
        assert_eq!(FeasibilityAnalyzer::ratio_score(1.5), 80.0);
        assert!(FeasibilityAnalyzer::ratio_score(0.5) < 20.0);
    }

    #[test]
    fn test_expiring_window_is_immediate() {
        let (analyzer, f) = fixture();
        // 280s after detection, 20s left of a 300s window against a 140s path.
        let now = f.opportunity.detected_at + 280_000;
        let report = analyzer.analyze(&f.opportunity, &f.path, &ample_resources(), &[], now);
        assert_eq!(report.urgency, Urgency::Immediate);
        assert!(report.timing < 40.0);
        assert!(
            report
                .alternatives
                .iter()
                .any(|a| matches!(a, ExecutionAlternative::DelayedExecution { .. }))
        );
    }

    #[test]
    fn test_unhealthy_critical_dependency_drags_infrastructure() {
        let (analyzer, f) = fixture();
        let deps = vec![
            DependencyStatus {
                name: "rpc:ethereum".to_string(),
                criticality: Criticality::Critical,
                healthy: false,
            },
            DependencyStatus {
                name: "metrics".to_string(),
                criticality: Criticality::Optional,
                healthy: true,
            },
        ];
        let healthy = analyzer.analyze(&f.opportunity, &f.path, &ample_resources(), &[], 2_000);
        let degraded = analyzer.analyze(&f.opportunity, &f.path, &ample_resources(), &deps, 2_000);
        assert!(degraded.infrastructure < healthy.infrastructure);
        assert!(
            degraded
                .bottlenecks
                .iter()
                .any(|b| b.severity == Severity::Critical)
        );
    }

    #[test]
    fn test_bottlenecks_sorted_by_severity() {
        let (analyzer, f) = fixture();
        let deps = vec![
            DependencyStatus {
                name: "metrics".to_string(),
                criticality: Criticality::Optional,
                healthy: false,
            },
            DependencyStatus {
                name: "signer".to_string(),
                criticality: Criticality::Critical,
                healthy: false,
            },
        ];
        let resources = AvailableResources {
            capital_usd: dec!(60_000), // 1.2x: medium bottleneck
            gas_usd: dec!(5_000),
            liquidity_usd: dec!(500_000),
        };
        let report = analyzer.analyze(&f.opportunity, &f.path, &resources, &deps, 2_000);
        assert!(report.bottlenecks.len() >= 2);
        for pair in report.bottlenecks.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
    }
}
