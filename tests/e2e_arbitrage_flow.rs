//! End-to-end detection flow through the full engine with mock adapters:
//! a profitable dislocation becomes a detected, evaluated and executed
//! opportunity; a stale quote produces nothing.

use arbsat::application::engine::{Engine, EngineAdapters};
use arbsat::config::{Config, Registry, SharedConfig};
use arbsat::domain::evaluation::EvaluationPriority;
use arbsat::domain::events::SatelliteEvent;
use arbsat::domain::identifiers::{AssetId, ChainId};
use arbsat::domain::market::PriceSample;
use arbsat::domain::ports::{
    ApprovalService, BridgeAdapter, ChainAdapter, PriceFeedAdapter, SignerAdapter,
};
use arbsat::infrastructure::adapters::AdapterSnapshotSource;
use arbsat::infrastructure::adapters::mock::{
    FixedApprovalService, MockBridgeAdapter, MockChainAdapter, MockPriceFeed, MockSignerAdapter,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const REGISTRY: &str = r#"
[[chains]]
id = "ethereum"
name = "Ethereum"
rpc_endpoint = "mock://ethereum"
gas_token = "ETH"
block_time_ms = 12000
finality_depth = 64
native_decimals = 18

[[chains]]
id = "polygon"
name = "Polygon"
rpc_endpoint = "mock://polygon"
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
address = "0xusdc-ethereum"
decimals = 6

[[assets.tokens]]
chain = "polygon"
address = "0xusdc-polygon"
decimals = 6
"#;

struct Harness {
    engine: Arc<Engine>,
    feed: Arc<MockPriceFeed>,
}

async fn harness() -> Harness {
    let mut config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
    config.monitoring.update_interval_ms = 200;
    config.risk.update_interval_ms = 500;
    config.security.require_multisig = false;
    config.validate().unwrap();
    let shared = SharedConfig::new(config);
    let current = shared.current();

    let chain_adapters: Vec<Arc<MockChainAdapter>> = current
        .registry
        .chains()
        .map(|c| Arc::new(MockChainAdapter::new(c.id.clone())))
        .collect();
    let chains: Vec<Arc<dyn ChainAdapter>> = chain_adapters
        .iter()
        .map(|c| c.clone() as Arc<dyn ChainAdapter>)
        .collect();
    let bridges: Vec<Arc<dyn BridgeAdapter>> = current
        .registry
        .bridges()
        .map(|b| {
            Arc::new(MockBridgeAdapter::new(
                b.id.clone(),
                b.fee_base_usd,
                b.fee_variable_pct,
            )) as Arc<dyn BridgeAdapter>
        })
        .collect();
    let feed = Arc::new(MockPriceFeed::new(1_024));

    let adapters = EngineAdapters {
        chains: chains.clone(),
        bridges,
        price_feed: feed.clone() as Arc<dyn PriceFeedAdapter>,
        signer: Arc::new(MockSignerAdapter) as Arc<dyn SignerAdapter>,
        snapshot_source: Arc::new(AdapterSnapshotSource::new(
            chains,
            vec![AssetId::new("USDC")],
            "0xvault".to_string(),
        )),
        approval: Some(Arc::new(FixedApprovalService::approving()) as Arc<dyn ApprovalService>),
        audit: None,
        history: None,
    };

    let engine = Engine::build(shared, adapters).unwrap();
    // A funded book so detected opportunities are executable.
    for chain in ["ethereum", "polygon"] {
        engine
            .coordinator
            .set_position(
                ChainId::new(chain),
                AssetId::new("USDC"),
                dec!(500_000),
                dec!(500_000),
                now(),
            )
            .await;
    }
    engine.clone().start().await.unwrap();
    // Let the first chain poll land so both chains read healthy.
    tokio::time::sleep(Duration::from_millis(300)).await;

    Harness { engine, feed }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn usdc(chain: &str, price: Decimal, ts: i64) -> PriceSample {
    PriceSample {
        asset: AssetId::new("USDC"),
        chain: ChainId::new(chain),
        price_usd: price,
        liquidity_usd: dec!(1_000_000),
        timestamp: ts,
        source: "test".to_string(),
    }
}

#[tokio::test]
async fn test_profitable_two_chain_arbitrage_is_detected_and_rated_high() {
    let h = harness().await;
    let mut events = h.engine.subscribe_events();

    h.feed.push(usdc("ethereum", dec!(1.0000), now())).await;
    h.feed.push(usdc("polygon", dec!(0.9950), now())).await;

    let mut detected = None;
    let mut evaluated = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while (detected.is_none() || evaluated.is_none())
        && tokio::time::Instant::now() < deadline
    {
        match tokio::time::timeout(Duration::from_millis(250), events.recv()).await {
            Ok(Ok(SatelliteEvent::OpportunityDetected(opp))) => detected = Some(opp),
            Ok(Ok(SatelliteEvent::OpportunityEvaluated(eval))) => evaluated = Some(eval),
            _ => {}
        }
    }

    let opp = detected.expect("opportunity should be detected");
    assert_eq!(opp.source_chain, ChainId::new("polygon"));
    assert_eq!(opp.target_chain, ChainId::new("ethereum"));
    // ~0.5% dislocation, profitable net of costs.
    assert!(opp.pct_diff >= dec!(0.005) && opp.pct_diff <= dec!(0.0051));
    assert_eq!(
        opp.net_profit,
        opp.expected_profit - opp.est_gas_cost - opp.bridge_fee
    );
    assert!(opp.net_profit > Decimal::ZERO);

    let eval = evaluated.expect("opportunity should be evaluated");
    assert!(eval.priority >= EvaluationPriority::High, "priority {:?}", eval.priority);
}

#[tokio::test]
async fn test_execution_flows_through_to_completion() {
    let h = harness().await;
    let mut events = h.engine.subscribe_events();

    h.feed.push(usdc("ethereum", dec!(1.0000), now())).await;
    h.feed.push(usdc("polygon", dec!(0.9950), now())).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut execution = None;
    while execution.is_none() && tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), events.recv()).await {
            Ok(Ok(SatelliteEvent::ExecutionCompleted(done))) => execution = Some(done),
            _ => {}
        }
    }

    let done = execution.expect("arbitrage should execute");
    assert!(done.success);
    assert!(done.realized_profit > Decimal::ZERO);
    assert_eq!(done.completed_steps, done.total_steps);

    // Profit landed in the book.
    let view = h.engine.coordinator.get_portfolio(now() + 60_000).await;
    assert!(view.total_value_usd > dec!(1_000_000));
}

#[tokio::test]
async fn test_stale_quote_produces_no_opportunity() {
    let h = harness().await;
    let mut events = h.engine.subscribe_events();

    let fresh = now();
    h.feed.push(usdc("ethereum", dec!(1.0000), fresh)).await;
    // One millisecond past the freshness limit.
    h.feed
        .push(usdc("polygon", dec!(0.9950), fresh - 30_001))
        .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut saw_opportunity = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SatelliteEvent::OpportunityDetected(_)) {
            saw_opportunity = true;
        }
    }
    assert!(!saw_opportunity, "stale sample must not produce a candidate");
}

#[tokio::test]
async fn test_single_fresh_quote_is_not_enough() {
    let h = harness().await;
    let mut events = h.engine.subscribe_events();

    h.feed.push(usdc("ethereum", dec!(1.0000), now())).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut saw_opportunity = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SatelliteEvent::OpportunityDetected(_)) {
            saw_opportunity = true;
        }
    }
    assert!(!saw_opportunity);
}
