//! Engine bootstrap: builds every subsystem, wires the event bus, and owns
//! the agent tasks. One engine per process; adapters are injected so live
//! and simulated runs share the same wiring.

use crate::application::asset_mapper::AssetMapper;
use crate::application::bridge_monitor::BridgeMonitor;
use crate::application::chain_state::ChainStateCache;
use crate::application::coordinator::PortfolioCoordinator;
use crate::application::detector::ArbitrageDetector;
use crate::application::evaluator::OpportunityEvaluator;
use crate::application::feasibility::{
    AvailableResources, Criticality, DependencyStatus, FeasibilityAnalyzer,
};
use crate::application::liquidity::LiquidityOptimizer;
use crate::application::monitoring::agent_status::{AgentStatusRegistry, HealthStatus};
use crate::application::planner::ExecutionPlanner;
use crate::application::price_feed::PriceFeedBus;
use crate::application::risk_assessor::RiskAssessor;
use crate::application::synchronizer::{CrossChainSynchronizer, SnapshotSource};
use crate::application::validation::OpportunityValidator;
use crate::config::SharedConfig;
use crate::domain::chain::ChainStateUpdate;
use crate::domain::evaluation::Recommendation;
use crate::domain::events::SatelliteEvent;
use crate::domain::identifiers::AssetId;
use crate::domain::ports::{
    ApprovalService, AuditSink, BridgeAdapter, ChainAdapter, PriceFeedAdapter, SignerAdapter,
};
use crate::infrastructure::adapters::AdapterStepExecutor;
use crate::infrastructure::observability::Metrics;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Everything the engine consumes across the boundary.
pub struct EngineAdapters {
    pub chains: Vec<Arc<dyn ChainAdapter>>,
    pub bridges: Vec<Arc<dyn BridgeAdapter>>,
    pub price_feed: Arc<dyn PriceFeedAdapter>,
    pub signer: Arc<dyn SignerAdapter>,
    pub snapshot_source: Arc<dyn SnapshotSource>,
    pub approval: Option<Arc<dyn ApprovalService>>,
    pub audit: Option<Arc<dyn AuditSink>>,
    pub history: Option<Arc<dyn AuditSink>>,
}

/// The assembled satellite.
pub struct Engine {
    config: SharedConfig,
    pub feed: Arc<PriceFeedBus>,
    pub chain_state: Arc<ChainStateCache>,
    pub mapper: Arc<AssetMapper>,
    pub monitor: Arc<BridgeMonitor>,
    pub risk: Arc<RiskAssessor>,
    pub detector: Arc<ArbitrageDetector>,
    pub validator: Arc<OpportunityValidator>,
    pub feasibility: Arc<FeasibilityAnalyzer>,
    pub coordinator: Arc<PortfolioCoordinator>,
    pub synchronizer: Arc<CrossChainSynchronizer>,
    pub agent_registry: Arc<AgentStatusRegistry>,
    pub metrics: Metrics,
    events: broadcast::Sender<SatelliteEvent>,
    chains: Vec<Arc<dyn ChainAdapter>>,
    price_feed: Arc<dyn PriceFeedAdapter>,
    history: Option<Arc<dyn AuditSink>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn build(config: SharedConfig, adapters: EngineAdapters) -> anyhow::Result<Arc<Self>> {
        let current = config.current();
        let started = now_ms();

        let feed = Arc::new(PriceFeedBus::new(
            1_024,
            current.validation.max_price_age_ms,
        ));
        let chain_state = Arc::new(ChainStateCache::new(&current.registry, started));
        let mapper = Arc::new(AssetMapper::new(&current.registry));
        let monitor = Arc::new(BridgeMonitor::new(
            adapters.bridges.clone(),
            current.monitoring.clone(),
            adapters.audit.clone(),
        ));
        let risk = Arc::new(RiskAssessor::new(monitor.clone(), current.risk.clone()));
        let detector = Arc::new(ArbitrageDetector::new(
            config.clone(),
            mapper.clone(),
            chain_state.clone(),
            feed.clone(),
            risk.clone(),
        ));
        let validator = Arc::new(OpportunityValidator::new(
            config.clone(),
            feed.clone(),
            monitor.clone(),
        ));
        let feasibility = Arc::new(FeasibilityAnalyzer::new(config.clone(), chain_state.clone()));
        let optimizer = Arc::new(LiquidityOptimizer::new(config.clone()));
        let planner = Arc::new(ExecutionPlanner::new(
            config.clone(),
            risk.clone(),
            monitor.clone(),
            feed.clone(),
        ));
        let executor = Arc::new(AdapterStepExecutor::new(
            adapters.chains.clone(),
            adapters.bridges.clone(),
            adapters.signer.clone(),
            1,
        ));
        let (events, _) = broadcast::channel(1_024);
        let coordinator = Arc::new(PortfolioCoordinator::new(
            config.clone(),
            optimizer,
            planner,
            executor,
            adapters.approval.clone(),
            adapters.audit.clone(),
            events.clone(),
        ));
        let synchronizer = Arc::new(CrossChainSynchronizer::new(
            config.clone(),
            adapters.snapshot_source.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            feed,
            chain_state,
            mapper,
            monitor,
            risk,
            detector,
            validator,
            feasibility,
            coordinator,
            synchronizer,
            agent_registry: AgentStatusRegistry::new(),
            metrics: Metrics::new()?,
            events,
            chains: adapters.chains,
            price_feed: adapters.price_feed,
            history: adapters.history,
            tasks: StdMutex::new(Vec::new()),
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SatelliteEvent> {
        self.events.subscribe()
    }

    /// Atomically swap the active configuration; agents pick it up on their
    /// next tick.
    pub fn reload(&self, config: crate::config::Config) -> anyhow::Result<()> {
        self.config.reload(config)
    }

    /// Spawn every agent task. Callers keep their own `Arc` and invoke
    /// this on a clone.
    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        info!("Engine: starting agents");
        let dirty: Arc<StdMutex<HashSet<AssetId>>> = Arc::new(StdMutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        tasks.push(Self::spawn_price_ingest(&self, dirty.clone()).await?);
        tasks.push(Self::spawn_detector_agent(&self, dirty));
        tasks.push(Self::spawn_chain_poller(&self));
        tasks.push(Self::spawn_bridge_monitor_agent(&self));
        tasks.push(Self::spawn_risk_agent(&self));
        tasks.push(Self::spawn_sync_agent(&self));
        tasks.push(Self::spawn_event_recorder(&self));

        let mut guard = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.extend(tasks);
        info!("Engine: {} agents running", guard.len());
        Ok(())
    }

    /// Stop accepting work, drain the coordinator, abort agents.
    pub async fn shutdown(&self, reason: &str) {
        info!("Engine: shutting down ({reason})");
        self.coordinator
            .emergency_stop(reason.to_string(), now_ms())
            .await;
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
        info!("Engine: stopped");
    }

    async fn spawn_price_ingest(
        engine: &Arc<Self>,
        dirty: Arc<StdMutex<HashSet<AssetId>>>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let mut rx = engine
            .price_feed
            .subscribe()
            .await
            .map_err(|err| anyhow::anyhow!("price feed subscription failed: {err}"))?;
        let engine = engine.clone();
        Ok(tokio::spawn(async move {
            while let Some(sample) = rx.recv().await {
                let asset = sample.asset.clone();
                engine.feed.publish(sample, now_ms());
                dirty
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(asset);
            }
            warn!("Engine: price feed stream ended");
        }))
    }

    fn spawn_detector_agent(
        engine: &Arc<Self>,
        dirty: Arc<StdMutex<HashSet<AssetId>>>,
    ) -> JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move {
            let coalesce = engine.config.current().arbitrage.scan_coalesce_ms;
            let mut tick = tokio::time::interval(Duration::from_millis(coalesce.max(10)));
            tick.tick().await;
            loop {
                tick.tick().await;
                let assets: Vec<AssetId> = {
                    let mut guard = dirty
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    guard.drain().collect()
                };
                engine
                    .agent_registry
                    .update_heartbeat("detector", HealthStatus::Healthy, now_ms())
                    .await;
                if assets.is_empty() {
                    continue;
                }
                engine.run_detection_cycle(&assets).await;
            }
        })
    }

    async fn run_detection_cycle(&self, assets: &[AssetId]) {
        let started = std::time::Instant::now();
        let now = now_ms();
        let result = self.detector.scan_assets(assets, now);
        self.metrics
            .detector_scan_seconds
            .observe(started.elapsed().as_secs_f64());

        for opportunity in result.opportunities {
            self.metrics
                .opportunities_total
                .with_label_values(&["detected"])
                .inc();
            let _ = self
                .events
                .send(SatelliteEvent::OpportunityDetected(Box::new(
                    opportunity.clone(),
                )));

            let validation = self.validator.validate(&opportunity, &result.paths, now);
            if validation.is_valid {
                self.metrics
                    .opportunities_total
                    .with_label_values(&["validated"])
                    .inc();
            }

            let Some(path) = opportunity
                .execution_paths
                .first()
                .and_then(|id| result.paths.get(*id))
            else {
                continue;
            };

            let portfolio = self.coordinator.get_portfolio(now).await;
            let source_liq = self
                .feed
                .latest(&opportunity.asset, &opportunity.source_chain)
                .map(|s| s.liquidity_usd)
                .unwrap_or_default();
            let target_liq = self
                .feed
                .latest(&opportunity.asset, &opportunity.target_chain)
                .map(|s| s.liquidity_usd)
                .unwrap_or_default();
            let resources = AvailableResources {
                capital_usd: portfolio.total_value_usd,
                gas_usd: self.config.current().validation.gas_budget_usd,
                liquidity_usd: source_liq.min(target_liq),
            };
            let dependencies = self.dependency_health().await;
            let report = self
                .feasibility
                .analyze(&opportunity, path, &resources, &dependencies, now);

            let evaluation = OpportunityEvaluator::evaluate(&opportunity, &validation, &report);
            let _ = self
                .events
                .send(SatelliteEvent::OpportunityEvaluated(Box::new(
                    evaluation.clone(),
                )));

            match evaluation.recommendation {
                Recommendation::ExecuteImmediately | Recommendation::ExecuteOptimized => {
                    match self
                        .coordinator
                        .execute_arbitrage(&opportunity, path, None, now)
                        .await
                    {
                        Ok(execution) => {
                            self.metrics
                                .opportunities_total
                                .with_label_values(&["executed"])
                                .inc();
                            self.metrics
                                .transactions_total
                                .with_label_values(&[
                                    "arbitrage",
                                    if execution.success { "completed" } else { "failed" },
                                ])
                                .inc();
                        }
                        Err(err) => {
                            debug!("Engine: arbitrage skipped: {err}");
                        }
                    }
                }
                Recommendation::Defer | Recommendation::Cancel => {}
            }
        }
    }

    async fn dependency_health(&self) -> Vec<DependencyStatus> {
        let mut deps = Vec::new();
        for state in self.chain_state.snapshot_all() {
            deps.push(DependencyStatus {
                name: format!("rpc:{}", state.chain),
                criticality: Criticality::Critical,
                healthy: state.status.is_usable(),
            });
        }
        for status in self.monitor.statuses() {
            deps.push(DependencyStatus {
                name: format!("bridge:{}", status.bridge),
                criticality: Criticality::Important,
                healthy: status.is_operational,
            });
        }
        deps
    }

    fn spawn_chain_poller(engine: &Arc<Self>) -> JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move {
            let interval_ms = engine.config.current().monitoring.update_interval_ms;
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
            loop {
                tick.tick().await;
                for adapter in &engine.chains {
                    let chain = adapter.chain();
                    let height = adapter.get_block_height().await;
                    let gas = adapter.get_gas_price().await;
                    match (height, gas) {
                        (Ok(block_height), Ok(gas_price)) => {
                            let config = engine.config.current();
                            let finality = config
                                .registry
                                .chain(&chain)
                                .map(|c| c.finality_depth as u64)
                                .unwrap_or(0);
                            let update = ChainStateUpdate {
                                chain: chain.clone(),
                                block_height,
                                finalized_height: block_height.saturating_sub(finality),
                                gas_price,
                                health_score: 95,
                                observed_at: now_ms(),
                            };
                            if let Err(err) = engine.chain_state.apply(update) {
                                warn!("Engine: chain update rejected: {err}");
                            }
                        }
                        _ => {
                            debug!("Engine: {chain} poll failed, staleness will degrade it");
                        }
                    }
                }
                engine.chain_state.refresh_staleness(now_ms());
                engine
                    .agent_registry
                    .update_heartbeat("chain_poller", HealthStatus::Healthy, now_ms())
                    .await;
            }
        })
    }

    fn spawn_bridge_monitor_agent(engine: &Arc<Self>) -> JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move {
            let interval_ms = engine.config.current().monitoring.update_interval_ms;
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
            let (_sub, mut alerts) = engine.monitor.subscribe();
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        engine.monitor.poll_once(now_ms()).await;
                        for status in engine.monitor.statuses() {
                            engine
                                .metrics
                                .bridge_operational
                                .with_label_values(&[status.bridge.as_str()])
                                .set(if status.is_operational { 1.0 } else { 0.0 });
                        }
                        engine
                            .agent_registry
                            .update_heartbeat("bridge_monitor", HealthStatus::Healthy, now_ms())
                            .await;
                    }
                    Some(alert) = alerts.recv() => {
                        let _ = engine.events.send(SatelliteEvent::BridgeAlert(alert));
                    }
                }
            }
        })
    }

    fn spawn_risk_agent(engine: &Arc<Self>) -> JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move {
            let interval_ms = engine.config.current().risk.update_interval_ms;
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
            loop {
                tick.tick().await;
                for alert in engine.risk.recompute_all(now_ms()) {
                    let _ = engine.events.send(SatelliteEvent::RiskAlert(alert));
                }
                engine
                    .agent_registry
                    .update_heartbeat("risk_assessor", HealthStatus::Healthy, now_ms())
                    .await;
            }
        })
    }

    fn spawn_sync_agent(engine: &Arc<Self>) -> JoinHandle<()> {
        let engine = engine.clone();
        tokio::spawn(async move {
            let interval_ms = engine.config.current().monitoring.update_interval_ms;
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
            loop {
                tick.tick().await;
                let started = std::time::Instant::now();
                match engine.synchronizer.full_sync(now_ms()).await {
                    Ok(report) => {
                        engine
                            .metrics
                            .sync_duration_seconds
                            .observe(started.elapsed().as_secs_f64());
                        for anomaly in report.anomalies {
                            let _ = engine.events.send(SatelliteEvent::SyncAnomaly(anomaly));
                        }
                        let portfolio = engine.coordinator.get_portfolio(now_ms()).await;
                        engine
                            .metrics
                            .portfolio_value_usd
                            .set(portfolio.total_value_usd.to_f64().unwrap_or(0.0));
                        for (chain, fraction) in &portfolio.actual_distribution {
                            let value = portfolio.total_value_usd * *fraction;
                            engine
                                .metrics
                                .chain_value_usd
                                .with_label_values(&[chain.as_str()])
                                .set(value.to_f64().unwrap_or(0.0));
                        }
                    }
                    Err(err) => {
                        warn!("Engine: sync round failed: {err}");
                        let _ = engine.events.send(SatelliteEvent::SyncAnomaly(
                            crate::domain::events::SyncAnomaly {
                                chain: None,
                                description: err.to_string(),
                                at: now_ms(),
                            },
                        ));
                    }
                }
                engine
                    .agent_registry
                    .update_heartbeat("synchronizer", HealthStatus::Healthy, now_ms())
                    .await;
            }
        })
    }

    /// Mirrors every bus event into metrics and the history log.
    fn spawn_event_recorder(engine: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = engine.events.subscribe();
        let engine = engine.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        engine
                            .metrics
                            .events_total
                            .with_label_values(&[event.kind()])
                            .inc();
                        if let Some(history) = &engine.history {
                            if let Ok(payload) = serde_json::to_value(&event) {
                                if let Err(err) = history.record(event.kind(), payload) {
                                    warn!("Engine: history write failed: {err:#}");
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Engine: event recorder lagged, missed {missed} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
