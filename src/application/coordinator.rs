use crate::application::liquidity::{LiquidityOptimizer, RebalancePlan};
use crate::application::planner::{ExecutionOutcome, ExecutionPlanner, OutcomeState, StepExecutor};
use crate::config::SharedConfig;
use crate::domain::bridge::Severity;
use crate::domain::coordination::{
    ArbitrageExecution, CoordinatedTransaction, TxId, TxKind, TxPriority, TxState,
};
use crate::domain::errors::CoordinationError;
use crate::domain::events::SatelliteEvent;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::opportunity::{ArbitrageOpportunity, ExecutionPath, StepKind};
use crate::domain::portfolio::{AssetPosition, PortfolioView};
use crate::domain::ports::{ApprovalService, AuditSink};
use crate::domain::risk_limits::{LimitScope, RiskLimit, RiskLimitKind};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How often a queued transaction re-checks for a free slot.
const QUEUE_POLL_MS: u64 = 25;

/// Snapshot of the coordinator for operators and tests.
#[derive(Debug, Clone)]
pub struct CoordinationStatus {
    pub stopped: bool,
    pub stop_reason: Option<String>,
    pub active_transactions: usize,
    pub queued_transactions: usize,
    pub locked_positions: usize,
    pub total_transactions: usize,
}

/// Outcome of a rebalance request.
#[derive(Debug, Clone)]
pub struct RebalanceReport {
    pub tx_id: TxId,
    pub state: TxState,
    pub moved_usd: Decimal,
    pub planned_moves: usize,
}

struct CoordinatorState {
    positions: HashMap<(ChainId, AssetId), AssetPosition>,
    transactions: HashMap<TxId, CoordinatedTransaction>,
    queue: VecDeque<TxId>,
    portfolio_cache: Option<PortfolioView>,
    risk_limits: Vec<RiskLimit>,
    stopped: Option<String>,
}

impl CoordinatorState {
    fn active_count(&self) -> usize {
        self.transactions
            .values()
            .filter(|t| t.state.is_active())
            .count()
    }

    fn executing_count(&self) -> usize {
        self.transactions
            .values()
            .filter(|t| t.state == TxState::Executing)
            .count()
    }

    fn total_value(&self) -> Decimal {
        self.positions.values().map(|p| p.value_usd).sum()
    }
}

/// Exclusive owner of positions, position locks, risk limits and
/// coordinated-transaction state. Everything else reads snapshots;
/// mutations flow through this component only.
pub struct PortfolioCoordinator {
    config: SharedConfig,
    optimizer: Arc<LiquidityOptimizer>,
    planner: Arc<ExecutionPlanner>,
    executor: Arc<dyn StepExecutor>,
    approval: Option<Arc<dyn ApprovalService>>,
    audit: Option<Arc<dyn AuditSink>>,
    events: broadcast::Sender<SatelliteEvent>,
    state: Mutex<CoordinatorState>,
}

impl PortfolioCoordinator {
    pub fn new(
        config: SharedConfig,
        optimizer: Arc<LiquidityOptimizer>,
        planner: Arc<ExecutionPlanner>,
        executor: Arc<dyn StepExecutor>,
        approval: Option<Arc<dyn ApprovalService>>,
        audit: Option<Arc<dyn AuditSink>>,
        events: broadcast::Sender<SatelliteEvent>,
    ) -> Self {
        Self {
            config,
            optimizer,
            planner,
            executor,
            approval,
            audit,
            events,
            state: Mutex::new(CoordinatorState {
                positions: HashMap::new(),
                transactions: HashMap::new(),
                queue: VecDeque::new(),
                portfolio_cache: None,
                risk_limits: Vec::new(),
                stopped: None,
            }),
        }
    }

    /// Seed or overwrite a position (startup sync, deposits, tests).
    pub async fn set_position(
        &self,
        chain: ChainId,
        asset: AssetId,
        balance: Decimal,
        value_usd: Decimal,
        now_ms: i64,
    ) {
        let mut state = self.state.lock().await;
        let key = (chain.clone(), asset.clone());
        match state.positions.get_mut(&key) {
            Some(position) => {
                position.balance = balance;
                position.value_usd = value_usd;
                position.last_update = now_ms;
            }
            None => {
                state
                    .positions
                    .insert(key, AssetPosition::new(chain, asset, balance, value_usd, now_ms));
            }
        }
        state.portfolio_cache = None;
    }

    pub async fn positions_snapshot(&self) -> Vec<AssetPosition> {
        let state = self.state.lock().await;
        let mut positions: Vec<AssetPosition> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.key().cmp(&b.key()));
        positions
    }

    pub async fn set_risk_limits(&self, limits: Vec<RiskLimit>) {
        let mut state = self.state.lock().await;
        state.risk_limits = limits;
    }

    /// Derived portfolio view, cached for at most the configured TTL.
    pub async fn get_portfolio(&self, now_ms: i64) -> PortfolioView {
        let config = self.config.current();
        let mut state = self.state.lock().await;
        if let Some(cache) = &state.portfolio_cache {
            if !cache.is_expired(now_ms, config.coordination.portfolio_cache_ms) {
                return cache.clone();
            }
        }
        let view = PortfolioView::compute(
            state.positions.values().cloned().collect(),
            config.liquidity.target_distribution.clone(),
            config.liquidity.rebalance_threshold,
            now_ms,
        );
        state.portfolio_cache = Some(view.clone());
        view
    }

    pub async fn get_coordination_status(&self) -> CoordinationStatus {
        let state = self.state.lock().await;
        CoordinationStatus {
            stopped: state.stopped.is_some(),
            stop_reason: state.stopped.clone(),
            active_transactions: state.active_count(),
            queued_transactions: state.queue.len(),
            locked_positions: state.positions.values().filter(|p| p.is_locked).count(),
            total_transactions: state.transactions.len(),
        }
    }

    pub async fn transaction(&self, id: TxId) -> Option<CoordinatedTransaction> {
        let state = self.state.lock().await;
        state.transactions.get(&id).cloned()
    }

    /// Construct a rebalance plan, admit it, and drive it to completion.
    pub async fn rebalance(
        &self,
        target: Option<HashMap<ChainId, Decimal>>,
        now_ms: i64,
    ) -> Result<RebalanceReport, CoordinationError> {
        let positions = {
            let state = self.state.lock().await;
            if let Some(reason) = &state.stopped {
                return Err(CoordinationError::Stopped {
                    reason: reason.clone(),
                });
            }
            let mut positions: Vec<AssetPosition> = state.positions.values().cloned().collect();
            positions.sort_by(|a, b| a.key().cmp(&b.key()));
            positions
        };

        let plan = self
            .optimizer
            .plan_rebalance(&positions, target.as_ref(), now_ms);
        let chains: Vec<ChainId> = plan
            .moves
            .iter()
            .flat_map(|m| [m.from_chain.clone(), m.to_chain.clone()])
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let assets: Vec<AssetId> = plan
            .moves
            .iter()
            .map(|m| m.asset.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let tx = CoordinatedTransaction::new(
            TxKind::Rebalance,
            chains,
            assets,
            TxPriority::Medium,
            now_ms,
        );
        let tx_id = tx.id;

        if plan.is_empty() {
            return Ok(RebalanceReport {
                tx_id,
                state: TxState::Completed,
                moved_usd: Decimal::ZERO,
                planned_moves: 0,
            });
        }

        self.admit(tx).await?;
        let outcome = self.run_rebalance(tx_id, &plan, now_ms).await;
        match outcome {
            Ok(report) => Ok(report),
            Err(err) => {
                self.fail_tx(tx_id, err.to_string(), now_ms).await;
                Err(err)
            }
        }
    }

    async fn run_rebalance(
        &self,
        tx_id: TxId,
        plan: &RebalancePlan,
        now_ms: i64,
    ) -> Result<RebalanceReport, CoordinationError> {
        // Lock every source and destination position involved.
        let keys: Vec<(ChainId, AssetId)> = plan
            .moves
            .iter()
            .flat_map(|m| {
                [
                    (m.from_chain.clone(), m.asset.clone()),
                    (m.to_chain.clone(), m.asset.clone()),
                ]
            })
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        self.lock_positions(tx_id, &keys, now_ms).await?;

        let result = self.run_rebalance_locked(tx_id, plan, now_ms).await;
        self.unlock_positions(tx_id).await;
        result
    }

    async fn run_rebalance_locked(
        &self,
        tx_id: TxId,
        plan: &RebalancePlan,
        now_ms: i64,
    ) -> Result<RebalanceReport, CoordinationError> {
        let total_before = {
            let state = self.state.lock().await;
            state.total_value()
        };

        // Risk gate: no transaction enters Executing while a critical limit
        // stands violated.
        self.enforce_risk_limits(plan).await?;
        self.transition_tx(tx_id, TxState::Executing, now_ms).await?;

        let execution_plan = self
            .planner
            .plan_rebalance(plan)
            .map_err(|err| CoordinationError::RiskLimitViolated {
                description: err.to_string(),
            })?;
        let outcome = self.planner.execute(&execution_plan, self.executor.as_ref()).await;

        let moved = self
            .apply_bridge_transfers(&execution_plan, &outcome, now_ms)
            .await;

        // Conservation: internal moves must not create or destroy value.
        let total_after = {
            let state = self.state.lock().await;
            state.total_value()
        };
        if total_before > Decimal::ZERO {
            let drift = (total_after - total_before).abs() / total_before;
            if drift > Decimal::new(1, 3) {
                let invariant = format!(
                    "portfolio conservation violated: {total_before} -> {total_after}"
                );
                error!("PortfolioCoordinator: {invariant}");
                self.emergency_stop("portfolio conservation violated".to_string(), now_ms)
                    .await;
                return Err(CoordinationError::InvariantViolated { invariant });
            }
        }

        let state = match outcome.state {
            OutcomeState::Completed | OutcomeState::PartialCompleted => {
                self.complete_tx(tx_id, &outcome, now_ms).await;
                TxState::Completed
            }
            OutcomeState::Failed => {
                self.fail_tx(
                    tx_id,
                    outcome
                        .reason
                        .clone()
                        .unwrap_or_else(|| "execution failed".to_string()),
                    now_ms,
                )
                .await;
                TxState::Failed
            }
        };

        self.audit_record(
            "rebalance",
            serde_json::json!({
                "tx_id": tx_id.to_string(),
                "moves": plan.moves.len(),
                "moved_usd": moved.to_string(),
                "state": format!("{state}"),
            }),
        );

        Ok(RebalanceReport {
            tx_id,
            state,
            moved_usd: moved,
            planned_moves: plan.moves.len(),
        })
    }

    /// Size, admit, lock and execute one arbitrage opportunity.
    pub async fn execute_arbitrage(
        &self,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        max_size: Option<Decimal>,
        now_ms: i64,
    ) -> Result<ArbitrageExecution, CoordinationError> {
        {
            let state = self.state.lock().await;
            if let Some(reason) = &state.stopped {
                return Err(CoordinationError::Stopped {
                    reason: reason.clone(),
                });
            }
        }
        let config = self.config.current();
        let portfolio = self.get_portfolio(now_ms).await;

        // Position sizing: the smallest of 5% of portfolio, 10x expected
        // profit, and the risk-scaled share of the book, clipped by the
        // caller.
        let five_pct = portfolio.total_value_usd * Decimal::new(5, 2);
        let ten_x = opportunity.expected_profit * Decimal::from(10);
        let risk_scale = Decimal::try_from(1.0 - opportunity.risk_score / 100.0)
            .unwrap_or(Decimal::ZERO);
        let risk_cap = portfolio.total_value_usd * risk_scale;
        let mut size = five_pct.min(ten_x).min(risk_cap).min(opportunity.size_usd);
        if let Some(cap) = max_size {
            size = size.min(cap);
        }
        if size <= Decimal::ZERO {
            return Err(CoordinationError::RiskLimitViolated {
                description: "position size collapsed to zero".to_string(),
            });
        }

        let source_key = (opportunity.source_chain.clone(), opportunity.asset.clone());
        {
            let state = self.state.lock().await;
            let holding = state.positions.get(&source_key);
            if holding.map(|p| p.value_usd < size).unwrap_or(true) {
                return Err(CoordinationError::InsufficientPosition {
                    chain: source_key.0.clone(),
                    asset: source_key.1.clone(),
                });
            }
        }

        let tx = CoordinatedTransaction::new(
            TxKind::Arbitrage,
            vec![
                opportunity.source_chain.clone(),
                opportunity.target_chain.clone(),
            ],
            vec![opportunity.asset.clone()],
            TxPriority::High,
            now_ms,
        );
        let tx_id = tx.id;

        // Multisig gate for transactions at or above the value ceiling.
        if config.security.require_multisig && size >= config.security.max_transaction_value_usd {
            match &self.approval {
                Some(approval) => {
                    let approved = approval
                        .request_approval(&tx, size)
                        .await
                        .map_err(|err| CoordinationError::RiskLimitViolated {
                            description: format!("approval service unavailable: {err}"),
                        })?;
                    if !approved {
                        return Err(CoordinationError::ApprovalDenied {
                            tx_id: tx_id.to_string(),
                        });
                    }
                }
                None => {
                    return Err(CoordinationError::RiskLimitViolated {
                        description: format!(
                            "transaction of ${size} requires multisig but no approval service is configured"
                        ),
                    });
                }
            }
        }

        self.admit(tx).await?;

        let keys = vec![
            source_key.clone(),
            (opportunity.target_chain.clone(), opportunity.asset.clone()),
        ];
        if let Err(err) = self.lock_positions(tx_id, &keys, now_ms).await {
            self.fail_tx(tx_id, err.to_string(), now_ms).await;
            return Err(err);
        }

        let result = self
            .run_arbitrage_locked(tx_id, opportunity, path, size, now_ms)
            .await;
        self.unlock_positions(tx_id).await;

        match &result {
            Ok(execution) if execution.success => {
                let _ = self
                    .events
                    .send(SatelliteEvent::ExecutionCompleted(Box::new(execution.clone())));
            }
            Ok(execution) => {
                let _ = self.events.send(SatelliteEvent::ExecutionFailed {
                    tx_id: execution.tx_id,
                    reason: "partial execution".to_string(),
                });
            }
            Err(err) => {
                let _ = self.events.send(SatelliteEvent::ExecutionFailed {
                    tx_id,
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    async fn run_arbitrage_locked(
        &self,
        tx_id: TxId,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        size: Decimal,
        now_ms: i64,
    ) -> Result<ArbitrageExecution, CoordinationError> {
        self.enforce_risk_limits_for_size(size).await?;
        self.transition_tx(tx_id, TxState::Executing, now_ms).await?;

        let plan = self
            .planner
            .plan_arbitrage(opportunity, path, size)
            .map_err(|err| CoordinationError::RiskLimitViolated {
                description: err.to_string(),
            })?;
        let outcome = self.planner.execute(&plan, self.executor.as_ref()).await;

        let scale = if opportunity.size_usd > Decimal::ZERO {
            size / opportunity.size_usd
        } else {
            Decimal::ONE
        };
        let success = outcome.state == OutcomeState::Completed;
        let realized = if success {
            opportunity.net_profit * scale
        } else {
            Decimal::ZERO
        };

        if success {
            // Value leaves the source chain and lands, with profit, on the
            // target chain.
            let mut state = self.state.lock().await;
            let source_key = (opportunity.source_chain.clone(), opportunity.asset.clone());
            let target_key = (opportunity.target_chain.clone(), opportunity.asset.clone());
            if let Some(p) = state.positions.get_mut(&source_key) {
                p.value_usd -= size;
                p.balance -= size / opportunity.source_price.max(Decimal::new(1, 6));
                p.last_update = now_ms;
            }
            if let Some(p) = state.positions.get_mut(&target_key) {
                p.value_usd += size + realized;
                p.balance += (size + realized) / opportunity.target_price.max(Decimal::new(1, 6));
                p.last_update = now_ms;
            }
            state.portfolio_cache = None;
            drop(state);
            self.complete_tx(tx_id, &outcome, now_ms).await;
        } else {
            self.fail_tx(
                tx_id,
                outcome
                    .reason
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
                now_ms,
            )
            .await;
        }

        let execution = ArbitrageExecution {
            tx_id,
            opportunity_id: opportunity.id,
            size_usd: size,
            realized_profit: realized,
            completed_steps: outcome.completed.len(),
            total_steps: plan.steps.len(),
            success,
            started_at: now_ms,
            ended_at: now_ms,
        };
        self.audit_record(
            "arbitrage_execution",
            serde_json::to_value(&execution).unwrap_or_default(),
        );
        Ok(execution)
    }

    /// Refuse new work, cancel queued and coordinating transactions, and
    /// drain executing ones within the configured budget.
    pub async fn emergency_stop(&self, reason: String, now_ms: i64) {
        let config = self.config.current();
        warn!("PortfolioCoordinator: EMERGENCY STOP: {reason}");
        {
            let mut state = self.state.lock().await;
            if state.stopped.is_some() {
                return;
            }
            state.stopped = Some(reason.clone());

            // Queued work is cancelled outright.
            let queued: Vec<TxId> = state.queue.drain(..).collect();
            for id in queued {
                if let Some(tx) = state.transactions.get_mut(&id) {
                    let _ = tx.fail("emergency stop", now_ms);
                }
            }
            // Coordinating transactions have not touched the chain yet.
            let coordinating: Vec<TxId> = state
                .transactions
                .values()
                .filter(|t| t.state == TxState::Coordinating)
                .map(|t| t.id)
                .collect();
            for id in coordinating {
                if let Some(tx) = state.transactions.get_mut(&id) {
                    let _ = tx.fail("emergency stop", now_ms);
                }
            }
        }

        let _ = self.events.send(SatelliteEvent::EmergencyStop {
            reason: reason.clone(),
            at: now_ms,
        });

        // Politely drain in-flight executions.
        let deadline = Instant::now() + Duration::from_secs(config.coordination.emergency_drain_timeout_s);
        loop {
            let executing = {
                let state = self.state.lock().await;
                state.executing_count()
            };
            if executing == 0 {
                info!("PortfolioCoordinator: drain complete, coordinator stopped");
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "PortfolioCoordinator: drain budget exhausted with {executing} transactions executing"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.audit_record("emergency_stop", serde_json::json!({ "reason": reason }));
    }

    // ------------------------------------------------------------------
    // Admission, locks and state transitions
    // ------------------------------------------------------------------

    /// Admit a transaction under the concurrency ceiling. Excess work queues
    /// FIFO; a full queue rejects non-critical work and displaces the
    /// lowest-priority entry for critical work.
    async fn admit(&self, tx: CoordinatedTransaction) -> Result<(), CoordinationError> {
        let config = self.config.current();
        let tx_id = tx.id;
        let priority = tx.priority;
        {
            let mut state = self.state.lock().await;
            if let Some(reason) = &state.stopped {
                return Err(CoordinationError::Stopped {
                    reason: reason.clone(),
                });
            }
            state.transactions.insert(tx_id, tx);

            if state.active_count() < config.coordination.max_concurrent_transactions
                && state.queue.is_empty()
            {
                let tx = state.transactions.get_mut(&tx_id).expect("just inserted");
                tx.transition(TxState::Coordinating, tx.created_at)
                    .expect("pending -> coordinating");
                return Ok(());
            }

            if state.queue.len() >= config.coordination.queue_capacity {
                if priority == TxPriority::Critical {
                    // Displace the lowest-priority queued entry.
                    let victim = state
                        .queue
                        .iter()
                        .copied()
                        .min_by_key(|id| state.transactions.get(id).map(|t| t.priority))
                        .filter(|id| {
                            state
                                .transactions
                                .get(id)
                                .map(|t| t.priority < TxPriority::Critical)
                                .unwrap_or(false)
                        });
                    match victim {
                        Some(victim_id) => {
                            state.queue.retain(|id| *id != victim_id);
                            if let Some(victim_tx) = state.transactions.get_mut(&victim_id) {
                                let _ = victim_tx.fail("displaced by critical transaction", 0);
                            }
                            warn!(
                                "PortfolioCoordinator: displaced {victim_id} for critical {tx_id}"
                            );
                        }
                        None => {
                            state.transactions.remove(&tx_id);
                            return Err(CoordinationError::QueueFull {
                                capacity: config.coordination.queue_capacity,
                            });
                        }
                    }
                } else {
                    state.transactions.remove(&tx_id);
                    return Err(CoordinationError::QueueFull {
                        capacity: config.coordination.queue_capacity,
                    });
                }
            }

            if priority == TxPriority::Critical {
                state.queue.push_front(tx_id);
            } else {
                state.queue.push_back(tx_id);
            }
        }

        self.wait_for_slot(tx_id).await
    }

    async fn wait_for_slot(&self, tx_id: TxId) -> Result<(), CoordinationError> {
        let config = self.config.current();
        let deadline =
            Instant::now() + Duration::from_secs(config.arbitrage.max_execution_time_s);
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(tx) = state.transactions.get(&tx_id) {
                    if tx.state == TxState::Failed {
                        return Err(CoordinationError::Stopped {
                            reason: tx
                                .failure_reason
                                .clone()
                                .unwrap_or_else(|| "cancelled while queued".to_string()),
                        });
                    }
                }
                if state.queue.front() == Some(&tx_id)
                    && state.active_count() < config.coordination.max_concurrent_transactions
                {
                    state.queue.pop_front();
                    let tx = state.transactions.get_mut(&tx_id).expect("queued tx exists");
                    tx.transition(TxState::Coordinating, tx.created_at)?;
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                let mut state = self.state.lock().await;
                state.queue.retain(|id| *id != tx_id);
                if let Some(tx) = state.transactions.get_mut(&tx_id) {
                    let _ = tx.fail("queue wait deadline exceeded", 0);
                }
                return Err(CoordinationError::DeadlineExceeded {
                    elapsed_s: config.arbitrage.max_execution_time_s,
                    limit_s: config.arbitrage.max_execution_time_s,
                });
            }
            tokio::time::sleep(Duration::from_millis(QUEUE_POLL_MS)).await;
        }
    }

    /// Non-reentrant, all-or-nothing position locking. A locked position
    /// fails fast with `ResourceBusy` rather than blocking.
    async fn lock_positions(
        &self,
        tx_id: TxId,
        keys: &[(ChainId, AssetId)],
        now_ms: i64,
    ) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        for key in keys {
            if let Some(position) = state.positions.get(key) {
                if position.is_locked {
                    return Err(CoordinationError::ResourceBusy {
                        chain: key.0.clone(),
                        asset: key.1.clone(),
                    });
                }
            }
        }
        for key in keys {
            let position = state
                .positions
                .entry(key.clone())
                .or_insert_with(|| {
                    AssetPosition::new(
                        key.0.clone(),
                        key.1.clone(),
                        Decimal::ZERO,
                        Decimal::ZERO,
                        now_ms,
                    )
                });
            position.is_locked = true;
            position.lock_owner = Some(tx_id);
        }
        Ok(())
    }

    async fn unlock_positions(&self, tx_id: TxId) {
        let mut state = self.state.lock().await;
        for position in state.positions.values_mut() {
            if position.lock_owner == Some(tx_id) {
                position.is_locked = false;
                position.lock_owner = None;
            }
        }
    }

    /// Apply value transfers for every completed bridge step and return the
    /// total moved.
    async fn apply_bridge_transfers(
        &self,
        plan: &crate::application::planner::ExecutionPlan,
        outcome: &ExecutionOutcome,
        now_ms: i64,
    ) -> Decimal {
        let mut state = self.state.lock().await;
        let mut moved = Decimal::ZERO;
        for id in &outcome.completed {
            let Some(step) = plan.step(*id) else { continue };
            if step.kind != StepKind::Bridge {
                continue;
            }
            let Some(to_chain) = &step.to_chain else { continue };
            let from_key = (step.chain.clone(), step.asset.clone());
            let to_key = (to_chain.clone(), step.asset.clone());
            if let Some(p) = state.positions.get_mut(&from_key) {
                p.value_usd -= step.amount_usd;
                p.balance -= step.amount_usd;
                p.last_update = now_ms;
            }
            let to_position = state.positions.entry(to_key.clone()).or_insert_with(|| {
                AssetPosition::new(
                    to_key.0.clone(),
                    to_key.1.clone(),
                    Decimal::ZERO,
                    Decimal::ZERO,
                    now_ms,
                )
            });
            to_position.value_usd += step.amount_usd;
            to_position.balance += step.amount_usd;
            to_position.last_update = now_ms;
            moved += step.amount_usd;
        }
        state.portfolio_cache = None;
        moved
    }

    /// A critical violated limit blocks entry into Executing.
    async fn enforce_risk_limits(&self, plan: &RebalancePlan) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        let total = state.total_value();
        let mut exposures: HashMap<ChainId, Decimal> = HashMap::new();
        for p in state.positions.values() {
            *exposures.entry(p.chain.clone()).or_default() += p.value_usd;
        }
        // Project the plan's destination inflows.
        for mv in &plan.moves {
            *exposures.entry(mv.to_chain.clone()).or_default() += mv.amount_usd;
            if let Some(from) = exposures.get_mut(&mv.from_chain) {
                *from -= mv.amount_usd;
            }
        }

        for limit in state.risk_limits.iter_mut() {
            let observed = match (&limit.kind, &limit.scope) {
                (RiskLimitKind::ChainExposure, LimitScope::Chain(chain)) => {
                    exposures.get(chain).copied().unwrap_or(Decimal::ZERO)
                }
                (RiskLimitKind::TransactionSize, _) => plan.total_moved(),
                _ => continue,
            };
            if limit.evaluate(observed, total) && limit.severity == Severity::Critical {
                return Err(CoordinationError::RiskLimitViolated {
                    description: limit.describe(),
                });
            }
        }
        Ok(())
    }

    async fn enforce_risk_limits_for_size(&self, size: Decimal) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        let total = state.total_value();
        for limit in state.risk_limits.iter_mut() {
            if limit.kind == RiskLimitKind::TransactionSize
                && limit.evaluate(size, total)
                && limit.severity == Severity::Critical
            {
                return Err(CoordinationError::RiskLimitViolated {
                    description: limit.describe(),
                });
            }
        }
        Ok(())
    }

    async fn transition_tx(
        &self,
        tx_id: TxId,
        next: TxState,
        now_ms: i64,
    ) -> Result<(), CoordinationError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.stopped {
            return Err(CoordinationError::Stopped {
                reason: reason.clone(),
            });
        }
        let tx = state
            .transactions
            .get_mut(&tx_id)
            .ok_or_else(|| CoordinationError::InvalidTransition {
                from: "missing".to_string(),
                to: next.to_string(),
            })?;
        tx.transition(next, now_ms)
    }

    async fn complete_tx(&self, tx_id: TxId, outcome: &ExecutionOutcome, now_ms: i64) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.transactions.get_mut(&tx_id) {
            for id in &outcome.completed {
                tx.record_sub_op(format!("step {:?}", id), true, "ok", now_ms);
            }
            if let Some(failed) = outcome.failed_step {
                tx.record_sub_op(
                    format!("step {:?}", failed),
                    false,
                    outcome.reason.clone().unwrap_or_default(),
                    now_ms,
                );
            }
            let _ = tx.transition(TxState::Completed, now_ms);
        }
    }

    async fn fail_tx(&self, tx_id: TxId, reason: String, now_ms: i64) {
        let mut state = self.state.lock().await;
        if let Some(tx) = state.transactions.get_mut(&tx_id) {
            if !tx.state.is_terminal() {
                let _ = tx.fail(reason, now_ms);
            }
        }
    }

    fn audit_record(&self, category: &str, payload: serde_json::Value) {
        let config = self.config.current();
        if !config.security.enable_audit_logging {
            return;
        }
        if let Some(audit) = &self.audit {
            if let Err(err) = audit.record(category, payload) {
                warn!("PortfolioCoordinator: audit write failed: {err:#}");
            }
        }
    }
}
