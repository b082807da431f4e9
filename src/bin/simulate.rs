//! Simulation harness: runs the full engine against in-process mock
//! adapters with a random-walk price generator that injects periodic
//! dislocations, then prints a run summary.
//!
//! ```sh
//! cargo run --bin simulate -- --duration 30
//! ```

use anyhow::Result;
use arbsat::application::engine::{Engine, EngineAdapters};
use arbsat::config::{Config, Registry, SharedConfig};
use arbsat::domain::identifiers::{AssetId, ChainId};
use arbsat::domain::market::PriceSample;
use arbsat::domain::ports::{
    ApprovalService, BridgeAdapter, ChainAdapter, PriceFeedAdapter, SignerAdapter,
};
use arbsat::infrastructure::adapters::AdapterSnapshotSource;
use arbsat::infrastructure::adapters::mock::{
    FixedApprovalService, MockBridgeAdapter, MockChainAdapter, MockPriceFeed, MockSignerAdapter,
};
use clap::Parser;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

const DEMO_REGISTRY: &str = r#"
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

[[chains]]
id = "arbitrum"
name = "Arbitrum"
rpc_endpoint = "mock://arbitrum"
gas_token = "ETH"
block_time_ms = 250
finality_depth = 64
native_decimals = 18

[[bridges]]
id = "stargate"
name = "Stargate"
supported_chains = ["ethereum", "polygon", "arbitrum"]
fee_base_usd = 5.0
fee_variable_pct = 0.0006
supported_assets = ["USDC", "WETH"]

[[bridges]]
id = "hop"
name = "Hop"
supported_chains = ["ethereum", "polygon", "arbitrum"]
fee_base_usd = 2.0
fee_variable_pct = 0.0010
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

[[assets.tokens]]
chain = "arbitrum"
address = "0xusdc-arbitrum"
decimals = 6

[[assets]]
id = "WETH"

[[assets.tokens]]
chain = "ethereum"
address = "0xweth-ethereum"
decimals = 18

[[assets.tokens]]
chain = "polygon"
address = "0xweth-polygon"
decimals = 18
"#;

#[derive(Parser, Debug)]
#[command(name = "simulate", about = "Run the satellite against mock adapters")]
struct Args {
    /// How long to run, in seconds.
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Price ticks per second.
    #[arg(long, default_value_t = 10)]
    tick_rate: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = Config::for_registry(Registry::from_toml_str(DEMO_REGISTRY)?);
    // Faster cadences so a short run exercises every agent.
    config.monitoring.update_interval_ms = 1_000;
    config.risk.update_interval_ms = 2_000;
    config.validate()?;
    let shared = SharedConfig::new(config);
    let current = shared.current();

    let chain_adapters: Vec<Arc<MockChainAdapter>> = current
        .registry
        .chains()
        .map(|c| Arc::new(MockChainAdapter::new(c.id.clone())))
        .collect();
    for adapter in &chain_adapters {
        for asset in current.registry.assets() {
            adapter.set_balance(asset.id.clone(), "0xvault", dec!(200_000));
        }
    }

    let feed = Arc::new(MockPriceFeed::new(4_096));
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
    let chains: Vec<Arc<dyn ChainAdapter>> = chain_adapters
        .iter()
        .map(|c| c.clone() as Arc<dyn ChainAdapter>)
        .collect();
    let assets: Vec<AssetId> = current.registry.assets().iter().map(|a| a.id.clone()).collect();

    let adapters = EngineAdapters {
        chains: chains.clone(),
        bridges,
        price_feed: feed.clone() as Arc<dyn PriceFeedAdapter>,
        signer: Arc::new(MockSignerAdapter) as Arc<dyn SignerAdapter>,
        snapshot_source: Arc::new(AdapterSnapshotSource::new(
            chains,
            assets.clone(),
            "0xvault".to_string(),
        )),
        approval: Some(Arc::new(FixedApprovalService::approving()) as Arc<dyn ApprovalService>),
        audit: None,
        history: None,
    };

    let engine = Engine::build(shared, adapters)?;

    // Seed the book: 70/15/15 over the three chains.
    for (chain, value) in [
        ("ethereum", dec!(700_000)),
        ("polygon", dec!(150_000)),
        ("arbitrum", dec!(150_000)),
    ] {
        engine
            .coordinator
            .set_position(
                ChainId::new(chain),
                AssetId::new("USDC"),
                value,
                value,
                chrono::Utc::now().timestamp_millis(),
            )
            .await;
    }

    engine.clone().start().await?;
    info!("simulation running for {}s", args.duration);

    // Price generator: random walk per (asset, chain) around a common mid,
    // with an occasional one-sided dislocation to trigger the detector.
    let generator = {
        let feed = feed.clone();
        let chain_ids: Vec<ChainId> = current.registry.chain_ids();
        let tick_rate = args.tick_rate.max(1);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(1_000 / tick_rate));
            let mut mid = 1.0f64;
            loop {
                tick.tick().await;
                // The RNG is not Send; build the tick's samples before any
                // await point.
                let samples: Vec<PriceSample> = {
                    let mut rng = rand::rng();
                    mid *= 1.0 + rng.random_range(-0.0004..0.0004);
                    chain_ids
                        .iter()
                        .map(|chain| {
                            let mut price = mid * (1.0 + rng.random_range(-0.0008..0.0008));
                            // Roughly one tick in forty knocks a venue off mid.
                            if rng.random_range(0..40) == 0 {
                                price *= 1.0 - rng.random_range(0.004..0.009);
                            }
                            PriceSample {
                                asset: AssetId::new("USDC"),
                                chain: chain.clone(),
                                price_usd: Decimal::from_f64(price).unwrap_or(Decimal::ONE),
                                liquidity_usd: dec!(1_000_000),
                                timestamp: chrono::Utc::now().timestamp_millis(),
                                source: "sim".to_string(),
                            }
                        })
                        .collect()
                };
                for sample in samples {
                    feed.push(sample).await;
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(args.duration)).await;
    generator.abort();

    let now = chrono::Utc::now().timestamp_millis();
    let portfolio = engine.coordinator.get_portfolio(now).await;
    let status = engine.coordinator.get_coordination_status().await;
    info!(
        "simulation done: portfolio ${}, {} transactions ({} active), efficiency {:.1}",
        portfolio.total_value_usd,
        status.total_transactions,
        status.active_transactions,
        portfolio.efficiency,
    );
    println!("{}", engine.metrics.encode()?);

    engine.shutdown("simulation complete").await;
    Ok(())
}
