use crate::domain::bridge::RiskLevel;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpportunityId(pub Uuid);

impl OpportunityId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for OpportunityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathId(pub Uuid);

impl PathId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Step identifier, local to one path or plan graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Swap,
    Bridge,
    Deposit,
    Withdraw,
}

/// Mechanisms that reduce value extractable by adversaries observing or
/// reordering transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MevProtection {
    PrivateMempool,
    TimeDelay,
    TransactionSplitting,
}

/// One node of an execution DAG. Dependencies reference sibling steps by id;
/// the graph carries no back-references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: StepId,
    pub kind: StepKind,
    pub chain: ChainId,
    pub protocol: String,
    pub contract: String,
    pub est_gas: Decimal,
    pub est_time_s: u32,
    pub dependencies: Vec<StepId>,
    pub mev_protection: Option<MevProtection>,
}

/// A candidate route realizing an opportunity: an ordered DAG of steps over
/// one bridge, with aggregate cost and risk figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPath {
    pub id: PathId,
    pub bridge: BridgeId,
    pub steps: Vec<ExecutionStep>,
    pub total_gas: Decimal,
    pub total_fees_usd: Decimal,
    pub est_time_s: u32,
    pub success_probability: f64,
    pub risk_level: RiskLevel,
}

impl ExecutionPath {
    pub fn has_mev_protection(&self) -> bool {
        self.steps.iter().any(|s| s.mev_protection.is_some())
    }

    pub fn cross_chain_hops(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Bridge)
            .count()
    }

    /// Every dependency must name an earlier step; the construction order is
    /// already a topological order, so this suffices as a DAG check.
    pub fn dependencies_are_acyclic(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.dependencies.iter().all(|d| d.0 < s.id.0))
    }
}

/// Arena of execution paths keyed by id. Opportunities and evaluations refer
/// to paths through this arena instead of embedding copies.
#[derive(Debug, Clone, Default)]
pub struct PathArena {
    paths: HashMap<PathId, ExecutionPath>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: ExecutionPath) -> PathId {
        let id = path.id;
        self.paths.insert(id, path);
        id
    }

    pub fn get(&self, id: PathId) -> Option<&ExecutionPath> {
        self.paths.get(&id)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn merge(&mut self, other: PathArena) {
        self.paths.extend(other.paths);
    }
}

/// A detected price dislocation between two chains, net of estimated costs.
///
/// Immutable once constructed; evaluations and executions reference it by id.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageOpportunity {
    pub id: OpportunityId,
    pub asset: AssetId,
    pub source_chain: ChainId,
    pub target_chain: ChainId,
    pub source_price: Decimal,
    pub target_price: Decimal,
    /// Relative difference as a fraction of the lower price.
    pub pct_diff: Decimal,
    pub expected_profit: Decimal,
    pub est_gas_cost: Decimal,
    pub bridge_fee: Decimal,
    pub net_profit: Decimal,
    /// Notional size the estimates assume, bounded by available depth.
    pub size_usd: Decimal,
    /// Net profit over deployed size, as a fraction.
    pub profit_margin: Decimal,
    pub execution_time_s: u32,
    pub risk_score: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub detected_at: i64,
    /// Candidate paths in preference order, resolved through the `PathArena`.
    pub execution_paths: Vec<PathId>,
}

impl ArbitrageOpportunity {
    /// Construction is the only place `net_profit` is derived, so the profit
    /// arithmetic invariant holds for every live opportunity.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asset: AssetId,
        source_chain: ChainId,
        target_chain: ChainId,
        source_price: Decimal,
        target_price: Decimal,
        pct_diff: Decimal,
        expected_profit: Decimal,
        est_gas_cost: Decimal,
        bridge_fee: Decimal,
        size_usd: Decimal,
        execution_time_s: u32,
        risk_score: f64,
        confidence: f64,
        detected_at: i64,
        execution_paths: Vec<PathId>,
    ) -> Self {
        let net_profit = expected_profit - est_gas_cost - bridge_fee;
        let profit_margin = if size_usd > Decimal::ZERO {
            net_profit / size_usd
        } else {
            Decimal::ZERO
        };
        Self {
            id: OpportunityId::generate(),
            asset,
            source_chain,
            target_chain,
            source_price,
            target_price,
            pct_diff,
            expected_profit,
            est_gas_cost,
            bridge_fee,
            net_profit,
            size_usd,
            profit_margin,
            execution_time_s,
            risk_score,
            confidence,
            detected_at,
            execution_paths,
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.net_profit > Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn step(id: u32, kind: StepKind, deps: Vec<u32>) -> ExecutionStep {
        ExecutionStep {
            id: StepId(id),
            kind,
            chain: ChainId::new("ethereum"),
            protocol: "uniswap-v3".to_string(),
            contract: "0xpool".to_string(),
            est_gas: dec!(120000),
            est_time_s: 15,
            dependencies: deps.into_iter().map(StepId).collect(),
            mev_protection: None,
        }
    }

    #[test]
    fn test_net_profit_arithmetic() {
        let opp = ArbitrageOpportunity::new(
            AssetId::new("USDC"),
            ChainId::new("polygon"),
            ChainId::new("ethereum"),
            dec!(0.9950),
            dec!(1.0000),
            dec!(0.005025),
            dec!(250),
            dec!(50),
            dec!(30),
            dec!(50000),
            180,
            25.0,
            0.9,
            0,
            vec![],
        );
        assert_eq!(opp.net_profit, opp.expected_profit - opp.est_gas_cost - opp.bridge_fee);
        assert_eq!(opp.net_profit, dec!(170));
        assert_eq!(opp.profit_margin, dec!(0.0034));
        assert!(opp.is_profitable());
    }

    #[test]
    fn test_path_dag_check() {
        let good = ExecutionPath {
            id: PathId::generate(),
            bridge: BridgeId::new("stargate"),
            steps: vec![
                step(0, StepKind::Withdraw, vec![]),
                step(1, StepKind::Bridge, vec![0]),
                step(2, StepKind::Deposit, vec![1]),
            ],
            total_gas: dec!(360000),
            total_fees_usd: dec!(30),
            est_time_s: 180,
            success_probability: 0.95,
            risk_level: RiskLevel::Low,
        };
        assert!(good.dependencies_are_acyclic());
        assert_eq!(good.cross_chain_hops(), 1);

        let bad = ExecutionPath {
            steps: vec![step(0, StepKind::Swap, vec![1]), step(1, StepKind::Swap, vec![0])],
            ..good.clone()
        };
        assert!(!bad.dependencies_are_acyclic());
    }

    #[test]
    fn test_arena_lookup() {
        let mut arena = PathArena::new();
        let path = ExecutionPath {
            id: PathId::generate(),
            bridge: BridgeId::new("hop"),
            steps: vec![],
            total_gas: Decimal::ZERO,
            total_fees_usd: Decimal::ZERO,
            est_time_s: 0,
            success_probability: 1.0,
            risk_level: RiskLevel::Low,
        };
        let id = arena.insert(path);
        assert!(arena.get(id).is_some());
        assert_eq!(arena.len(), 1);
    }
}
