//! arbsat: headless cross-chain arbitrage satellite.
//!
//! Runs the full engine against live adapters (`MODE=live`) or the
//! in-process simulation stack (`MODE=mock`, the default). Metrics are
//! push-based: the Prometheus registry is text-encoded to stdout on an
//! interval with the `METRICS_TEXT:` prefix, no HTTP server.

use anyhow::{Context, Result};
use arbsat::application::engine::{Engine, EngineAdapters};
use arbsat::config::{Config, Mode, SharedConfig};
use arbsat::domain::identifiers::AssetId;
use arbsat::domain::ports::{
    ApprovalService, AuditSink, BridgeAdapter, ChainAdapter, PriceFeedAdapter,
};
use arbsat::infrastructure::adapters::mock::{
    FixedApprovalService, MockBridgeAdapter, MockChainAdapter, MockPriceFeed, MockSignerAdapter,
};
use arbsat::infrastructure::adapters::{AdapterSnapshotSource, EvmRpcAdapter};
use arbsat::infrastructure::feeds::WsPriceFeed;
use arbsat::infrastructure::persistence::JsonlLog;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "arbsat", about = "Cross-chain arbitrage satellite")]
struct Args {
    /// Path to the chain/bridge/asset registry TOML.
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Metrics output interval in seconds.
    #[arg(long, default_value_t = 60)]
    metrics_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("arbsat {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(args.registry.as_deref())?;
    info!(
        "Configuration loaded: mode {:?}, {} chains, {} bridges, {} assets",
        config.mode,
        config.registry.chain_ids().len(),
        config.registry.bridges().count(),
        config.registry.assets().len(),
    );

    let audit = Arc::new(
        JsonlLog::open(
            std::env::var("AUDIT_LOG_PATH").unwrap_or_else(|_| "data/audit.jsonl".to_string()),
        )
        .context("opening audit log")?,
    );
    let history = Arc::new(
        JsonlLog::open(
            std::env::var("HISTORY_LOG_PATH").unwrap_or_else(|_| "data/history.jsonl".to_string()),
        )
        .context("opening history log")?,
    );

    let adapters = build_adapters(&config, audit.clone(), history.clone())?;
    let shared = SharedConfig::new(config);
    let engine = Engine::build(shared, adapters)?;
    engine.clone().start().await?;
    info!("arbsat running; ctrl-c to stop");

    // Push-based metrics: text exposition to stdout on an interval.
    {
        let engine = engine.clone();
        let interval = args.metrics_interval.max(5);
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(interval));
            loop {
                tick.tick().await;
                if let Ok(text) = engine.metrics.encode() {
                    for line in text.lines().filter(|l| !l.starts_with('#')) {
                        println!("METRICS_TEXT:{line}");
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    engine.shutdown("operator signal").await;
    Ok(())
}

fn build_adapters(
    config: &Config,
    audit: Arc<JsonlLog>,
    history: Arc<JsonlLog>,
) -> Result<EngineAdapters> {
    let assets: Vec<AssetId> = config.registry.assets().iter().map(|a| a.id.clone()).collect();
    let vault = std::env::var("VAULT_ADDRESS").unwrap_or_else(|_| "0xvault".to_string());

    // Bridge adapters are quote-table stubs parameterized by the registry;
    // per-protocol live integrations plug in behind the same port.
    let bridges: Vec<Arc<dyn BridgeAdapter>> = config
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

    let chains: Vec<Arc<dyn ChainAdapter>> = match config.mode {
        Mode::Live => config
            .registry
            .chains()
            .map(|c| Ok(Arc::new(EvmRpcAdapter::new(c)?) as Arc<dyn ChainAdapter>))
            .collect::<Result<_>>()?,
        Mode::Mock => config
            .registry
            .chains()
            .map(|c| Arc::new(MockChainAdapter::new(c.id.clone())) as Arc<dyn ChainAdapter>)
            .collect(),
    };

    let price_feed: Arc<dyn PriceFeedAdapter> = match config.mode {
        Mode::Live => {
            let url = std::env::var("PRICE_FEED_WS_URL")
                .context("PRICE_FEED_WS_URL is required in live mode")?;
            Arc::new(WsPriceFeed::new(url.parse()?, "ws"))
        }
        Mode::Mock => Arc::new(MockPriceFeed::new(1_024)),
    };

    let snapshot_source = Arc::new(AdapterSnapshotSource::new(chains.clone(), assets, vault));

    Ok(EngineAdapters {
        chains,
        bridges,
        price_feed,
        signer: Arc::new(MockSignerAdapter),
        snapshot_source,
        approval: Some(Arc::new(FixedApprovalService::approving()) as Arc<dyn ApprovalService>),
        audit: Some(audit as Arc<dyn AuditSink>),
        history: Some(history as Arc<dyn AuditSink>),
    })
}
