//! Concurrency properties of the coordinator: lock exclusivity, the
//! concurrency ceiling, and emergency stop draining in-flight work.

use arbsat::application::bridge_monitor::BridgeMonitor;
use arbsat::application::coordinator::PortfolioCoordinator;
use arbsat::application::liquidity::LiquidityOptimizer;
use arbsat::application::planner::{ExecutionPlanner, PlannedStep, StepExecutor};
use arbsat::application::price_feed::PriceFeedBus;
use arbsat::application::risk_assessor::RiskAssessor;
use arbsat::config::{Config, Registry, SharedConfig};
use arbsat::domain::bridge::RiskLevel;
use arbsat::domain::errors::{AdapterError, CoordinationError};
use arbsat::domain::identifiers::{AssetId, BridgeId, ChainId};
use arbsat::domain::opportunity::{
    ArbitrageOpportunity, ExecutionPath, ExecutionStep, MevProtection, PathId, StepId, StepKind,
};
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const REGISTRY: &str = r#"
[[chains]]
id = "ethereum"
name = "Ethereum"
rpc_endpoint = "mock://ethereum"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "polygon"
name = "Polygon"
rpc_endpoint = "mock://polygon"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "arbitrum"
name = "Arbitrum"
rpc_endpoint = "mock://arbitrum"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "base"
name = "Base"
rpc_endpoint = "mock://base"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "optimism"
name = "Optimism"
rpc_endpoint = "mock://optimism"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "avalanche"
name = "Avalanche"
rpc_endpoint = "mock://avalanche"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "fantom"
name = "Fantom"
rpc_endpoint = "mock://fantom"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "gnosis"
name = "Gnosis"
rpc_endpoint = "mock://gnosis"
gas_token = "GAS"
block_time_ms = 2000
finality_depth = 64
native_decimals = 18

[[bridges]]
id = "stargate"
name = "Stargate"
supported_chains = ["ethereum", "polygon", "arbitrum", "base", "optimism", "avalanche", "fantom", "gnosis"]
fee_base_usd = 5.0
fee_variable_pct = 0.0006
supported_assets = ["USDC"]

[[assets]]
id = "USDC"
"#;

/// Executor taking a fixed wall-clock delay per step.
struct SlowExecutor {
    delay: Duration,
}

#[async_trait]
impl StepExecutor for SlowExecutor {
    async fn execute_step(&self, _step: &PlannedStep) -> Result<(), AdapterError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn coordinator(step_delay: Duration) -> Arc<PortfolioCoordinator> {
    let mut config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
    config.security.require_multisig = false;
    let shared = SharedConfig::new(config);
    let current = shared.current();

    let monitor = Arc::new(BridgeMonitor::new(vec![], current.monitoring.clone(), None));
    let risk = Arc::new(RiskAssessor::new(monitor.clone(), current.risk.clone()));
    let feed = Arc::new(PriceFeedBus::new(64, current.validation.max_price_age_ms));
    let optimizer = Arc::new(LiquidityOptimizer::new(shared.clone()));
    let planner = Arc::new(ExecutionPlanner::new(shared.clone(), risk, monitor, feed));
    let (events, _) = broadcast::channel(256);

    Arc::new(PortfolioCoordinator::new(
        shared,
        optimizer,
        planner,
        Arc::new(SlowExecutor { delay: step_delay }),
        None,
        None,
        events,
    ))
}

async fn seed(coordinator: &PortfolioCoordinator) {
    for chain in [
        "ethereum", "polygon", "arbitrum", "base", "optimism", "avalanche", "fantom", "gnosis",
    ] {
        coordinator
            .set_position(
                ChainId::new(chain),
                AssetId::new("USDC"),
                dec!(400_000),
                dec!(400_000),
                0,
            )
            .await;
    }
}

fn opportunity(source: &str, target: &str) -> (ArbitrageOpportunity, ExecutionPath) {
    let path = ExecutionPath {
        id: PathId::generate(),
        bridge: BridgeId::new("stargate"),
        steps: vec![
            ExecutionStep {
                id: StepId(0),
                kind: StepKind::Swap,
                chain: ChainId::new(source),
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
                chain: ChainId::new(source),
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
        AssetId::new("USDC"),
        ChainId::new(source),
        ChainId::new(target),
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
        0,
        vec![path.id],
    );
    (opportunity, path)
}

#[tokio::test]
async fn test_lock_exclusivity_for_contended_positions() {
    let coordinator = coordinator(Duration::from_millis(300));
    seed(&coordinator).await;

    // Two arbitrages over the same (polygon, USDC) source position.
    let (opp_a, path_a) = opportunity("polygon", "ethereum");
    let (opp_b, path_b) = opportunity("polygon", "arbitrum");

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .execute_arbitrage(&opp_a, &path_a, None, 0)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let contended = coordinator
        .execute_arbitrage(&opp_b, &path_b, None, 0)
        .await;

    // The second caller fails fast instead of blocking on the lock.
    assert!(matches!(
        contended.unwrap_err(),
        CoordinationError::ResourceBusy { .. }
    ));

    let execution = first.await.unwrap().unwrap();
    assert!(execution.success);

    // After completion the lock is released and the position usable again.
    let (opp_c, path_c) = opportunity("polygon", "ethereum");
    let retried = coordinator
        .execute_arbitrage(&opp_c, &path_c, None, 0)
        .await
        .unwrap();
    assert!(retried.success);
}

#[tokio::test]
async fn test_emergency_stop_with_three_in_flight_transactions() {
    let coordinator = coordinator(Duration::from_millis(400));
    seed(&coordinator).await;

    // Three disjoint corridors so all three run concurrently.
    let corridors = [
        ("ethereum", "polygon"),
        ("arbitrum", "base"),
        ("optimism", "avalanche"),
    ];
    let mut handles = Vec::new();
    for (source, target) in corridors {
        let (opp, path) = opportunity(source, target);
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.execute_arbitrage(&opp, &path, None, 0).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    let status = coordinator.get_coordination_status().await;
    assert_eq!(status.active_transactions, 3);

    let started = std::time::Instant::now();
    coordinator.emergency_stop("drill".to_string(), 1_000).await;
    // The drain budget is 60s; with ~1s of in-flight work this returns
    // almost immediately, and always within the budget.
    assert!(started.elapsed() < Duration::from_secs(60));

    let status = coordinator.get_coordination_status().await;
    assert!(status.stopped);
    assert_eq!(status.active_transactions, 0);

    // New work is refused once stopped.
    let (opp, path) = opportunity("ethereum", "polygon");
    assert!(matches!(
        coordinator
            .execute_arbitrage(&opp, &path, None, 2_000)
            .await
            .unwrap_err(),
        CoordinationError::Stopped { .. }
    ));

    for handle in handles {
        let _ = handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_concurrency_ceiling_is_respected() {
    let coordinator = coordinator(Duration::from_millis(300));
    seed(&coordinator).await;

    // Four requests, ceiling three: the fourth queues.
    let corridors = [
        ("ethereum", "polygon"),
        ("arbitrum", "base"),
        ("optimism", "avalanche"),
    ];
    let mut handles = Vec::new();
    for (source, target) in corridors {
        let (opp, path) = opportunity(source, target);
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.execute_arbitrage(&opp, &path, None, 0).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        coordinator.get_coordination_status().await.active_transactions,
        3
    );

    // Fourth request targets disjoint positions but must wait its turn.
    let (opp, path) = opportunity("fantom", "gnosis");
    let queued = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute_arbitrage(&opp, &path, None, 0).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = coordinator.get_coordination_status().await;
    assert!(status.active_transactions <= 3);
    assert_eq!(status.queued_transactions, 1);

    for handle in handles {
        let _ = handle.await.unwrap();
    }
    let _ = queued.await.unwrap();
}
