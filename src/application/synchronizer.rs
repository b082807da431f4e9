use crate::config::SharedConfig;
use crate::domain::errors::{AdapterError, SyncError};
use crate::domain::events::SyncAnomaly;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::sync::{
    ChainSnapshot, GlobalSyncState, RecoveryStrategy, SyncConflict, SyncMode,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Seam for collecting a point-in-time view of one chain. The live
/// implementation reads chain adapters; tests and simulation script it.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, chain: &ChainId, now_ms: i64) -> Result<ChainSnapshot, AdapterError>;
}

/// Everything one synchronization round produced.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub state: GlobalSyncState,
    pub anomalies: Vec<SyncAnomaly>,
    /// Conflicts resolved this round, with their agreed values.
    pub resolved: Vec<(SyncConflict, Decimal)>,
    /// Conflicts that could not meet the consensus threshold.
    pub unresolved: Vec<SyncConflict>,
}

struct SyncMemory {
    snapshots: HashMap<ChainId, ChainSnapshot>,
    previous_total: Option<Decimal>,
    pending_conflicts: Vec<SyncConflict>,
    last_state: Option<GlobalSyncState>,
}

/// Periodically reconciles per-chain views into a `GlobalSyncState`,
/// resolving divergent facts by confidence-weighted consensus and surfacing
/// what it cannot reconcile.
pub struct CrossChainSynchronizer {
    config: SharedConfig,
    source: Arc<dyn SnapshotSource>,
    chains: Vec<ChainId>,
    memory: Mutex<SyncMemory>,
}

impl CrossChainSynchronizer {
    pub fn new(config: SharedConfig, source: Arc<dyn SnapshotSource>) -> Self {
        let chains = {
            let mut chains = config.current().registry.chain_ids();
            chains.sort();
            chains
        };
        Self {
            config,
            source,
            chains,
            memory: Mutex::new(SyncMemory {
                snapshots: HashMap::new(),
                previous_total: None,
                pending_conflicts: Vec::new(),
                last_state: None,
            }),
        }
    }

    /// Queue a divergence observed elsewhere for consensus resolution on
    /// the next sync round.
    pub async fn report_conflict(&self, conflict: SyncConflict) {
        let mut memory = self.memory.lock().await;
        memory.pending_conflicts.push(conflict);
    }

    pub async fn last_state(&self) -> Option<GlobalSyncState> {
        let memory = self.memory.lock().await;
        memory.last_state.clone()
    }

    /// Full sync: snapshot every configured chain concurrently, validate
    /// hashes and drift, check value conservation, resolve pending
    /// conflicts.
    pub async fn full_sync(&self, now_ms: i64) -> Result<SyncReport, SyncError> {
        let config = self.config.current();

        let futures: Vec<_> = self
            .chains
            .iter()
            .map(|chain| {
                let chain = chain.clone();
                let source = self.source.clone();
                async move {
                    let result = source.snapshot(&chain, now_ms).await;
                    (chain, result)
                }
            })
            .collect();
        let results = futures::future::join_all(futures).await;

        let mut snapshots = HashMap::new();
        let mut failed: HashMap<ChainId, RecoveryStrategy> = HashMap::new();
        for (chain, result) in results {
            match result {
                Ok(snapshot) => {
                    snapshots.insert(chain, snapshot);
                }
                Err(err) => {
                    let strategy = match err {
                        AdapterError::RpcTimeout { .. } => RecoveryStrategy::RpcRetry,
                        AdapterError::Transport { .. } => RecoveryStrategy::Reroute,
                        _ => RecoveryStrategy::Wait,
                    };
                    warn!("CrossChainSynchronizer: {chain} failed sync ({err}), recovery {strategy:?}");
                    failed.insert(chain, strategy);
                }
            }
        }

        if snapshots.len() < config.sync.min_chains_for_operation {
            return Err(SyncError::InsufficientChains {
                healthy: snapshots.len(),
                required: config.sync.min_chains_for_operation,
            });
        }

        self.reconcile(snapshots, failed, SyncMode::Full, now_ms).await
    }

    /// Incremental sync: refresh only the chains carrying changed
    /// (chain, asset) tuples and recompute affected aggregates.
    pub async fn incremental_sync(
        &self,
        changed: &[(ChainId, AssetId)],
        now_ms: i64,
    ) -> Result<SyncReport, SyncError> {
        let config = self.config.current();
        let mut affected: Vec<ChainId> = changed.iter().map(|(c, _)| c.clone()).collect();
        affected.sort();
        affected.dedup();

        let mut snapshots = {
            let memory = self.memory.lock().await;
            memory.snapshots.clone()
        };
        let mut failed = HashMap::new();
        for chain in &affected {
            match self.source.snapshot(chain, now_ms).await {
                Ok(snapshot) => {
                    debug!("CrossChainSynchronizer: refreshed {chain} incrementally");
                    snapshots.insert(chain.clone(), snapshot);
                }
                Err(err) => {
                    let strategy = match err {
                        AdapterError::RpcTimeout { .. } => RecoveryStrategy::RpcRetry,
                        AdapterError::Transport { .. } => RecoveryStrategy::Reroute,
                        _ => RecoveryStrategy::Wait,
                    };
                    failed.insert(chain.clone(), strategy);
                }
            }
        }

        if snapshots.len() < config.sync.min_chains_for_operation {
            return Err(SyncError::InsufficientChains {
                healthy: snapshots.len(),
                required: config.sync.min_chains_for_operation,
            });
        }

        self.reconcile(snapshots, failed, SyncMode::Incremental, now_ms)
            .await
    }

    /// Resolve one conflict by confidence-weighted average, requiring the
    /// combined confidence to meet the consensus threshold.
    pub fn resolve_conflict(&self, conflict: &SyncConflict) -> Result<Decimal, SyncError> {
        let config = self.config.current();
        if conflict.total_confidence() < config.sync.min_consensus_threshold {
            return Err(SyncError::ConsensusConflict {
                chain_a: conflict.chain_a.clone(),
                chain_b: conflict.chain_b.clone(),
                asset: conflict.asset.clone(),
                confidence: conflict.total_confidence(),
            });
        }
        Ok(conflict.weighted_value())
    }

    async fn reconcile(
        &self,
        snapshots: HashMap<ChainId, ChainSnapshot>,
        failed: HashMap<ChainId, RecoveryStrategy>,
        mode: SyncMode,
        now_ms: i64,
    ) -> Result<SyncReport, SyncError> {
        let config = self.config.current();
        let mut anomalies = Vec::new();

        let per_chain_hashes: HashMap<ChainId, String> = snapshots
            .iter()
            .map(|(c, s)| (c.clone(), s.state_hash()))
            .collect();
        let consensus_scores: HashMap<ChainId, f64> = snapshots
            .iter()
            .map(|(c, s)| (c.clone(), s.confidence))
            .collect();

        // Timestamp drift across the snapshot set.
        let (min_ts, max_ts) = snapshots.values().fold((i64::MAX, i64::MIN), |acc, s| {
            (acc.0.min(s.taken_at), acc.1.max(s.taken_at))
        });
        let max_drift_ms = if snapshots.is_empty() { 0 } else { max_ts - min_ts };
        if max_drift_ms > config.sync.max_drift_ms {
            anomalies.push(SyncAnomaly {
                chain: None,
                description: format!(
                    "snapshot timestamp drift {max_drift_ms}ms exceeds {}ms",
                    config.sync.max_drift_ms
                ),
                at: now_ms,
            });
        }

        // Value conservation against the previous round.
        let total: Decimal = snapshots.values().map(|s| s.value_usd).sum();
        let mut memory = self.memory.lock().await;
        let conservation_error = match memory.previous_total {
            Some(previous) if previous > Decimal::ZERO => {
                let error = (total - previous).abs() / previous;
                if error > Decimal::new(1, 3) {
                    anomalies.push(SyncAnomaly {
                        chain: None,
                        description: format!(
                            "value conservation error {error:.6} ({previous} -> {total})"
                        ),
                        at: now_ms,
                    });
                }
                error
            }
            _ => Decimal::ZERO,
        };

        // Hash changes on chains whose height did not advance point at
        // divergent state.
        for (chain, snapshot) in &snapshots {
            if let Some(previous) = memory.snapshots.get(chain) {
                if previous.block_height == snapshot.block_height
                    && previous.state_hash() != snapshot.state_hash()
                {
                    anomalies.push(SyncAnomaly {
                        chain: Some(chain.clone()),
                        description: format!(
                            "state hash changed at unchanged height {}",
                            snapshot.block_height
                        ),
                        at: now_ms,
                    });
                }
            }
        }

        // Consensus resolution of reported conflicts.
        let pending = std::mem::take(&mut memory.pending_conflicts);
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for conflict in pending {
            match self.resolve_conflict(&conflict) {
                Ok(value) => {
                    info!(
                        "CrossChainSynchronizer: resolved {} between {} and {} at {value}",
                        conflict.asset, conflict.chain_a, conflict.chain_b
                    );
                    resolved.push((conflict, value));
                }
                Err(err) => {
                    anomalies.push(SyncAnomaly {
                        chain: None,
                        description: err.to_string(),
                        at: now_ms,
                    });
                    unresolved.push(conflict);
                }
            }
        }
        // Unresolved conflicts stay flagged for the next round.
        memory.pending_conflicts = unresolved.clone();

        let state = GlobalSyncState {
            last_sync_ts: now_ms,
            mode,
            max_drift_ms,
            per_chain_hashes,
            consensus_scores,
            conservation_error,
            healthy_chains: snapshots.len(),
            failed_chains: failed,
        };

        memory.previous_total = Some(total);
        memory.snapshots = snapshots;
        memory.last_state = Some(state.clone());

        Ok(SyncReport {
            state,
            anomalies,
            resolved,
            unresolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Registry};
    use rust_decimal_macros::dec;
    use std::sync::Mutex as StdMutex;

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

[[chains]]
id = "arbitrum"
name = "Arbitrum"
rpc_endpoint = "http://localhost:8547"
gas_token = "ETH"
block_time_ms = 250
finality_depth = 64
native_decimals = 18
"#;

    /// Scripted snapshot source with per-chain values and failures.
    struct ScriptedSource {
        values: StdMutex<HashMap<ChainId, Decimal>>,
        failing: StdMutex<HashMap<ChainId, AdapterError>>,
        calls: StdMutex<Vec<ChainId>>,
    }

    impl ScriptedSource {
        fn new(values: &[(&str, Decimal)]) -> Arc<Self> {
            Arc::new(Self {
                values: StdMutex::new(
                    values
                        .iter()
                        .map(|(c, v)| (ChainId::new(*c), *v))
                        .collect(),
                ),
                failing: StdMutex::new(HashMap::new()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn set_value(&self, chain: &str, value: Decimal) {
            self.values
                .lock()
                .unwrap()
                .insert(ChainId::new(chain), value);
        }

        fn fail(&self, chain: &str, err: AdapterError) {
            self.failing
                .lock()
                .unwrap()
                .insert(ChainId::new(chain), err);
        }

        fn calls(&self) -> Vec<ChainId> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn snapshot(
            &self,
            chain: &ChainId,
            now_ms: i64,
        ) -> Result<ChainSnapshot, AdapterError> {
            self.calls.lock().unwrap().push(chain.clone());
            if let Some(err) = self.failing.lock().unwrap().get(chain) {
                return Err(err.clone());
            }
            let value = self
                .values
                .lock()
                .unwrap()
                .get(chain)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let mut balances = HashMap::new();
            balances.insert(AssetId::new("USDC"), value);
            Ok(ChainSnapshot {
                chain: chain.clone(),
                block_height: 1_000,
                balances,
                value_usd: value,
                taken_at: now_ms,
                confidence: 0.95,
            })
        }
    }

    fn synchronizer(source: Arc<ScriptedSource>) -> CrossChainSynchronizer {
        let config = Config::for_registry(Registry::from_toml_str(REGISTRY).unwrap());
        CrossChainSynchronizer::new(SharedConfig::new(config), source)
    }

    fn default_source() -> Arc<ScriptedSource> {
        ScriptedSource::new(&[
            ("ethereum", dec!(700_000)),
            ("polygon", dec!(150_000)),
            ("arbitrum", dec!(150_000)),
        ])
    }

    #[tokio::test]
    async fn test_full_sync_produces_global_state() {
        let source = default_source();
        let sync = synchronizer(source);

        let report = sync.full_sync(1_000).await.unwrap();
        assert_eq!(report.state.healthy_chains, 3);
        assert_eq!(report.state.per_chain_hashes.len(), 3);
        assert!(report.state.failed_chains.is_empty());
        assert!(report.anomalies.is_empty());
        assert_eq!(report.state.mode, SyncMode::Full);
    }

    #[tokio::test]
    async fn test_failed_chain_gets_recovery_strategy() {
        let source = default_source();
        source.fail("polygon", AdapterError::RpcTimeout { duration_ms: 5_000 });
        let sync = synchronizer(source.clone());

        let report = sync.full_sync(1_000).await.unwrap();
        assert_eq!(report.state.healthy_chains, 2);
        assert_eq!(
            report.state.failed_chains.get(&ChainId::new("polygon")),
            Some(&RecoveryStrategy::RpcRetry)
        );

        source.fail(
            "polygon",
            AdapterError::Transport {
                reason: "dns".to_string(),
            },
        );
        let report = sync.full_sync(2_000).await.unwrap();
        assert_eq!(
            report.state.failed_chains.get(&ChainId::new("polygon")),
            Some(&RecoveryStrategy::Reroute)
        );
    }

    #[tokio::test]
    async fn test_too_few_chains_aborts_sync() {
        let source = default_source();
        source.fail("ethereum", AdapterError::RpcTimeout { duration_ms: 1 });
        source.fail("polygon", AdapterError::RpcTimeout { duration_ms: 1 });
        source.fail("arbitrum", AdapterError::RpcTimeout { duration_ms: 1 });
        let sync = synchronizer(source);

        let err = sync.full_sync(1_000).await.unwrap_err();
        assert!(matches!(err, SyncError::InsufficientChains { healthy: 0, .. }));
    }

    #[tokio::test]
    async fn test_conservation_anomaly_on_value_jump() {
        let source = default_source();
        let sync = synchronizer(source.clone());

        sync.full_sync(1_000).await.unwrap();
        // 5% of the book vanishes between rounds.
        source.set_value("ethereum", dec!(650_000));
        let report = sync.full_sync(2_000).await.unwrap();
        assert!(report.state.conservation_error > dec!(0.001));
        assert!(
            report
                .anomalies
                .iter()
                .any(|a| a.description.contains("conservation"))
        );
    }

    #[tokio::test]
    async fn test_incremental_sync_touches_only_affected_chains() {
        let source = default_source();
        let sync = synchronizer(source.clone());
        sync.full_sync(1_000).await.unwrap();

        let before = source.calls().len();
        let changed = vec![(ChainId::new("polygon"), AssetId::new("USDC"))];
        let report = sync.incremental_sync(&changed, 2_000).await.unwrap();

        assert_eq!(report.state.mode, SyncMode::Incremental);
        assert_eq!(report.state.healthy_chains, 3);
        let calls = source.calls();
        assert_eq!(calls.len() - before, 1);
        assert_eq!(calls.last(), Some(&ChainId::new("polygon")));
    }

    #[tokio::test]
    async fn test_conflict_resolution_by_weighted_consensus() {
        let source = default_source();
        let sync = synchronizer(source);

        let conflict = SyncConflict {
            asset: AssetId::new("USDC"),
            chain_a: ChainId::new("ethereum"),
            chain_b: ChainId::new("polygon"),
            value_a: dec!(100),
            value_b: dec!(200),
            confidence_a: 0.5,
            confidence_b: 0.5,
        };
        // Combined confidence 1.0 >= 0.67: weighted average.
        assert_eq!(sync.resolve_conflict(&conflict).unwrap(), dec!(150));

        let weak = SyncConflict {
            confidence_a: 0.3,
            confidence_b: 0.2,
            ..conflict
        };
        assert!(matches!(
            sync.resolve_conflict(&weak),
            Err(SyncError::ConsensusConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_unresolved_conflicts_flagged_and_retained() {
        let source = default_source();
        let sync = synchronizer(source);

        sync.report_conflict(SyncConflict {
            asset: AssetId::new("USDC"),
            chain_a: ChainId::new("ethereum"),
            chain_b: ChainId::new("polygon"),
            value_a: dec!(100),
            value_b: dec!(900),
            confidence_a: 0.2,
            confidence_b: 0.2,
        })
        .await;

        let report = sync.full_sync(1_000).await.unwrap();
        assert_eq!(report.resolved.len(), 0);
        assert_eq!(report.unresolved.len(), 1);
        assert!(
            report
                .anomalies
                .iter()
                .any(|a| a.description.contains("Consensus conflict"))
        );

        // Still pending on the next round.
        let next = sync.full_sync(2_000).await.unwrap();
        assert_eq!(next.unresolved.len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_conflicts_clear_the_queue() {
        let source = default_source();
        let sync = synchronizer(source);

        sync.report_conflict(SyncConflict {
            asset: AssetId::new("USDC"),
            chain_a: ChainId::new("ethereum"),
            chain_b: ChainId::new("polygon"),
            value_a: dec!(100),
            value_b: dec!(110),
            confidence_a: 0.9,
            confidence_b: 0.9,
        })
        .await;

        let report = sync.full_sync(1_000).await.unwrap();
        assert_eq!(report.resolved.len(), 1);
        let next = sync.full_sync(2_000).await.unwrap();
        assert!(next.resolved.is_empty() && next.unresolved.is_empty());
    }
}
