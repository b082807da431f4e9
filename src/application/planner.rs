use crate::application::bridge_monitor::BridgeMonitor;
use crate::application::liquidity::RebalancePlan;
use crate::application::price_feed::PriceFeedBus;
use crate::application::risk_assessor::RiskAssessor;
use crate::application::validation::simulate_slippage;
use crate::config::SharedConfig;
use crate::domain::errors::{AdapterError, PlanningError};
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use crate::domain::opportunity::{
    ArbitrageOpportunity, ExecutionPath, MevProtection, StepId, StepKind,
};
use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One dispatchable operation of an execution plan.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub id: StepId,
    pub kind: StepKind,
    pub chain: ChainId,
    pub asset: AssetId,
    /// Bridge carrying this step, for `StepKind::Bridge`.
    pub bridge: Option<BridgeId>,
    /// Destination chain, for `StepKind::Bridge`.
    pub to_chain: Option<ChainId>,
    pub amount_usd: Decimal,
    pub dependencies: Vec<StepId>,
    pub mev: Option<MevProtection>,
    /// Whether a compensating step can undo this one after completion.
    pub reversible: bool,
}

/// A staged plan: steps, their Kahn layering, and the compensating rollback
/// sequence (a sibling graph, not back-references into this one).
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub steps: Vec<PlannedStep>,
    /// Stage i only contains steps whose dependencies live in stages < i.
    pub stages: Vec<Vec<StepId>>,
    pub deadline_s: u64,
}

impl ExecutionPlan {
    pub fn step(&self, id: StepId) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeState {
    Completed,
    /// Enough of the plan landed to accept it without rollback.
    PartialCompleted,
    Failed,
}

/// What happened when a plan was driven to completion or failure.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub plan_id: Uuid,
    pub state: OutcomeState,
    pub completed: Vec<StepId>,
    pub failed_step: Option<StepId>,
    pub completion: f64,
    pub rolled_back: bool,
    pub reason: Option<String>,
}

/// Seam through which the planner dispatches individual steps. The live
/// implementation drives chain/bridge/signer adapters; tests script it.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, step: &PlannedStep) -> Result<(), AdapterError>;
}

/// Transforms moves and opportunities into staged plans and drives them with
/// per-step retries, a deadline, and compensating rollback.
pub struct ExecutionPlanner {
    config: SharedConfig,
    risk: Arc<RiskAssessor>,
    monitor: Arc<BridgeMonitor>,
    feed: Arc<PriceFeedBus>,
}

impl ExecutionPlanner {
    pub fn new(
        config: SharedConfig,
        risk: Arc<RiskAssessor>,
        monitor: Arc<BridgeMonitor>,
        feed: Arc<PriceFeedBus>,
    ) -> Self {
        Self {
            config,
            risk,
            monitor,
            feed,
        }
    }

    /// Cost-optimized bridge for a corridor, skipping outages and any bridge
    /// whose risk assessment is critical. Falls back to the next-best bridge.
    fn select_bridge(
        &self,
        from: &ChainId,
        to: &ChainId,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<BridgeId, PlanningError> {
        let config = self.config.current();
        let mut ranked: Vec<(BridgeId, Decimal)> = config
            .registry
            .eligible_bridges(from, to, asset)
            .into_iter()
            .map(|b| (b.id.clone(), b.fee_for(amount)))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (bridge, _) in &ranked {
            if !self.risk.is_usable(bridge) {
                debug!("ExecutionPlanner: skipping {bridge}: critical risk");
                continue;
            }
            if let Some(status) = self.monitor.status(bridge) {
                if !status.is_operational {
                    debug!("ExecutionPlanner: skipping {bridge}: outage");
                    continue;
                }
            }
            return Ok(bridge.clone());
        }
        Err(PlanningError::NoUsableBridge {
            asset: asset.clone(),
            source_chain: from.clone(),
            target: to.clone(),
        })
    }

    /// Smallest chunk count whose simulated per-chunk slippage fits the
    /// tolerance. Chunks carry equal expected slippage by carrying equal
    /// size.
    fn chunk_count(&self, amount: Decimal, liquidity: Decimal) -> u32 {
        let config = self.config.current();
        let tolerance = config.validation.max_slippage_tolerance;
        let mut chunks = 1u32;
        while chunks < 64 {
            let per_chunk = amount / Decimal::from(chunks);
            if simulate_slippage(per_chunk, liquidity) <= tolerance {
                break;
            }
            chunks += 1;
        }
        chunks
    }

    /// Protection choice per chunk scales with the value at stake.
    fn mev_for_amount(&self, amount: Decimal) -> Option<MevProtection> {
        let config = self.config.current();
        let threshold = config.validation.mev_protection_threshold_usd;
        if amount >= threshold * Decimal::from(100) {
            Some(MevProtection::PrivateMempool)
        } else if amount >= threshold * Decimal::from(10) {
            Some(MevProtection::TransactionSplitting)
        } else if amount >= threshold {
            Some(MevProtection::TimeDelay)
        } else {
            None
        }
    }

    /// Build a staged plan realizing a set of rebalance moves. Independent
    /// moves share stages; each chunk is withdraw -> bridge -> deposit.
    pub fn plan_rebalance(&self, rebalance: &RebalancePlan) -> Result<ExecutionPlan, PlanningError> {
        let config = self.config.current();
        let mut steps = Vec::new();
        let mut next_id = 0u32;

        for mv in &rebalance.moves {
            let bridge = self.select_bridge(&mv.from_chain, &mv.to_chain, &mv.asset, mv.amount_usd)?;
            let liquidity = self
                .feed
                .latest(&mv.asset, &mv.from_chain)
                .map(|s| s.liquidity_usd)
                .unwrap_or(mv.amount_usd);
            let chunks = self.chunk_count(mv.amount_usd, liquidity);
            let chunk_amount = mv.amount_usd / Decimal::from(chunks);

            for _ in 0..chunks {
                let mev = self.mev_for_amount(chunk_amount);
                let withdraw = StepId(next_id);
                steps.push(PlannedStep {
                    id: withdraw,
                    kind: StepKind::Withdraw,
                    chain: mv.from_chain.clone(),
                    asset: mv.asset.clone(),
                    bridge: None,
                    to_chain: None,
                    amount_usd: chunk_amount,
                    dependencies: vec![],
                    mev,
                    reversible: true,
                });
                let bridge_step = StepId(next_id + 1);
                steps.push(PlannedStep {
                    id: bridge_step,
                    kind: StepKind::Bridge,
                    chain: mv.from_chain.clone(),
                    asset: mv.asset.clone(),
                    bridge: Some(bridge.clone()),
                    to_chain: Some(mv.to_chain.clone()),
                    amount_usd: chunk_amount,
                    dependencies: vec![withdraw],
                    mev,
                    reversible: true,
                });
                steps.push(PlannedStep {
                    id: StepId(next_id + 2),
                    kind: StepKind::Deposit,
                    chain: mv.to_chain.clone(),
                    asset: mv.asset.clone(),
                    bridge: None,
                    to_chain: None,
                    amount_usd: chunk_amount,
                    dependencies: vec![bridge_step],
                    mev: None,
                    reversible: true,
                });
                next_id += 3;
            }
        }

        let stages = Self::stage(&steps)?;
        Ok(ExecutionPlan {
            id: Uuid::new_v4(),
            steps,
            stages,
            deadline_s: config.liquidity.rebalance_deadline_s,
        })
    }

    /// Build a staged plan from an opportunity's chosen path.
    pub fn plan_arbitrage(
        &self,
        opportunity: &ArbitrageOpportunity,
        path: &ExecutionPath,
        size_usd: Decimal,
    ) -> Result<ExecutionPlan, PlanningError> {
        let config = self.config.current();
        if !self.risk.is_usable(&path.bridge) {
            return Err(PlanningError::NoUsableBridge {
                asset: opportunity.asset.clone(),
                source_chain: opportunity.source_chain.clone(),
                target: opportunity.target_chain.clone(),
            });
        }

        let steps: Vec<PlannedStep> = path
            .steps
            .iter()
            .map(|s| PlannedStep {
                id: s.id,
                kind: s.kind,
                chain: s.chain.clone(),
                asset: opportunity.asset.clone(),
                bridge: (s.kind == StepKind::Bridge).then(|| path.bridge.clone()),
                to_chain: (s.kind == StepKind::Bridge)
                    .then(|| opportunity.target_chain.clone()),
                amount_usd: size_usd,
                dependencies: s.dependencies.clone(),
                mev: s.mev_protection.or_else(|| self.mev_for_amount(size_usd)),
                reversible: s.kind != StepKind::Swap,
            })
            .collect();

        let stages = Self::stage(&steps)?;
        Ok(ExecutionPlan {
            id: Uuid::new_v4(),
            steps,
            stages,
            deadline_s: config.arbitrage.max_execution_time_s,
        })
    }

    /// Kahn layering of the dependency DAG. Every step lands in the first
    /// stage after all of its dependencies.
    fn stage(steps: &[PlannedStep]) -> Result<Vec<Vec<StepId>>, PlanningError> {
        let mut placed: HashMap<StepId, usize> = HashMap::new();
        let mut stages: Vec<Vec<StepId>> = Vec::new();
        let mut remaining: Vec<&PlannedStep> = steps.iter().collect();

        while !remaining.is_empty() {
            let mut this_stage = Vec::new();
            for step in &remaining {
                if step.dependencies.iter().all(|d| placed.contains_key(d)) {
                    this_stage.push(step.id);
                }
            }
            if this_stage.is_empty() {
                return Err(PlanningError::DependencyCycle {
                    step: remaining[0].id.0,
                });
            }
            let stage_index = stages.len();
            for id in &this_stage {
                placed.insert(*id, stage_index);
            }
            remaining.retain(|s| !placed.contains_key(&s.id));
            stages.push(this_stage);
        }
        Ok(stages)
    }

    /// Compensating sequence for the completed prefix of a plan: reversible
    /// steps, reversed direction, reversed staging order.
    pub fn rollback_plan(plan: &ExecutionPlan, completed: &[StepId]) -> Vec<PlannedStep> {
        let done: HashSet<StepId> = completed.iter().copied().collect();
        let mut compensating = Vec::new();
        let mut next_id = 0u32;

        for stage in plan.stages.iter().rev() {
            for id in stage.iter().rev() {
                let Some(step) = plan.step(*id) else { continue };
                if !done.contains(id) || !step.reversible {
                    continue;
                }
                let comp = match step.kind {
                    StepKind::Withdraw => PlannedStep {
                        kind: StepKind::Deposit,
                        ..step.clone()
                    },
                    StepKind::Deposit => PlannedStep {
                        kind: StepKind::Withdraw,
                        ..step.clone()
                    },
                    StepKind::Bridge => PlannedStep {
                        chain: step.to_chain.clone().unwrap_or_else(|| step.chain.clone()),
                        to_chain: Some(step.chain.clone()),
                        ..step.clone()
                    },
                    StepKind::Swap => step.clone(),
                };
                compensating.push(PlannedStep {
                    id: StepId(next_id),
                    dependencies: if next_id == 0 {
                        vec![]
                    } else {
                        vec![StepId(next_id - 1)]
                    },
                    ..comp
                });
                next_id += 1;
            }
        }
        compensating
    }

    /// Drive a plan to completion. Step failures are retried with
    /// exponential backoff; the deadline stops new stages; a failed plan
    /// with enough completed work is accepted as partial, otherwise the
    /// completed prefix is rolled back.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        executor: &dyn StepExecutor,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let deadline = Duration::from_secs(plan.deadline_s);
        let mut completed: Vec<StepId> = Vec::new();
        let mut failed_step = None;
        let mut reason = None;

        'stages: for stage in &plan.stages {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                reason = Some("Timeout".to_string());
                break 'stages;
            }

            let futures: Vec<_> = stage
                .iter()
                .filter_map(|id| plan.step(*id))
                .map(|step| self.execute_with_retry(step, executor))
                .collect();

            let results = match tokio::time::timeout(remaining, futures::future::join_all(futures))
                .await
            {
                Ok(results) => results,
                Err(_) => {
                    reason = Some("Timeout".to_string());
                    break 'stages;
                }
            };

            for (id, result) in stage.iter().zip(results) {
                match result {
                    Ok(()) => completed.push(*id),
                    Err(err) => {
                        error!("ExecutionPlanner: step {:?} failed: {err}", id);
                        failed_step = Some(*id);
                        reason = Some(err.to_string());
                    }
                }
            }
            if failed_step.is_some() {
                break 'stages;
            }
        }

        let completion = if plan.steps.is_empty() {
            1.0
        } else {
            completed.len() as f64 / plan.steps.len() as f64
        };

        let config = self.config.current();
        if failed_step.is_none() && reason.is_none() {
            info!("ExecutionPlanner: plan {} completed", plan.id);
            return ExecutionOutcome {
                plan_id: plan.id,
                state: OutcomeState::Completed,
                completed,
                failed_step: None,
                completion,
                rolled_back: false,
                reason: None,
            };
        }

        if completion >= config.coordination.partial_execution_threshold {
            warn!(
                "ExecutionPlanner: plan {} accepted partially ({:.0}% complete): {:?}",
                plan.id,
                completion * 100.0,
                reason
            );
            return ExecutionOutcome {
                plan_id: plan.id,
                state: OutcomeState::PartialCompleted,
                completed,
                failed_step,
                completion,
                rolled_back: false,
                reason,
            };
        }

        let rolled_back = self.rollback(plan, &completed, executor).await;
        ExecutionOutcome {
            plan_id: plan.id,
            state: OutcomeState::Failed,
            completed,
            failed_step,
            completion,
            rolled_back,
            reason,
        }
    }

    async fn execute_with_retry(
        &self,
        step: &PlannedStep,
        executor: &dyn StepExecutor,
    ) -> Result<(), AdapterError> {
        let config = self.config.current();
        let max_retries = config.coordination.max_retries;
        let initial_delay = config.coordination.retry_initial_delay_ms;

        let mut attempt = 0u32;
        loop {
            match executor.execute_step(step).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    let backoff = initial_delay * 2u64.pow(attempt);
                    let jitter = rand::rng().random_range(0..=initial_delay / 4 + 1);
                    debug!(
                        "ExecutionPlanner: step {:?} attempt {} failed ({err}), retrying in {}ms",
                        step.id,
                        attempt + 1,
                        backoff + jitter
                    );
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Best-effort compensation of the completed prefix, reversed staging.
    async fn rollback(
        &self,
        plan: &ExecutionPlan,
        completed: &[StepId],
        executor: &dyn StepExecutor,
    ) -> bool {
        let compensating = Self::rollback_plan(plan, completed);
        if compensating.is_empty() {
            return true;
        }
        info!(
            "ExecutionPlanner: rolling back {} completed steps of plan {}",
            compensating.len(),
            plan.id
        );
        for step in &compensating {
            if let Err(err) = self.execute_with_retry(step, executor).await {
                error!(
                    "ExecutionPlanner: rollback step {:?} failed: {err} ({})",
                    step.id,
                    PlanningError::RollbackFailed {
                        reason: err.to_string()
                    }
                );
                return false;
            }
        }
        true
    }
}
