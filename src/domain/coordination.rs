use crate::domain::errors::CoordinationError;
use crate::domain::identifiers::{AssetId, ChainId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub Uuid);

impl TxId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Rebalance,
    Arbitrage,
    Emergency,
    Optimization,
}

/// Queue priority; `Critical` may pre-empt queued work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle of a coordinated transaction. Transitions are monotonic and
/// `Failed` is terminal; a failed transaction may spawn a sibling rollback
/// transaction but never reanimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Pending,
    Coordinating,
    Executing,
    Completed,
    Failed,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Completed | TxState::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TxState::Coordinating | TxState::Executing)
    }

    pub fn can_transition_to(&self, next: TxState) -> bool {
        use TxState::*;
        matches!(
            (self, next),
            (Pending, Coordinating)
                | (Coordinating, Executing)
                | (Executing, Completed)
                | (Pending, Failed)
                | (Coordinating, Failed)
                | (Executing, Failed)
        )
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxState::Pending => "pending",
            TxState::Coordinating => "coordinating",
            TxState::Executing => "executing",
            TxState::Completed => "completed",
            TxState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one sub-operation within a coordinated transaction.
#[derive(Debug, Clone, Serialize)]
pub struct SubOpResult {
    pub op_id: Uuid,
    pub description: String,
    pub success: bool,
    pub detail: String,
    pub at: i64,
}

/// A logical cross-chain operation composed of sub-operations executed under
/// a shared state machine and rollback plan. Owned by the coordinator; state
/// transitions are serialized per transaction id.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatedTransaction {
    pub id: TxId,
    pub kind: TxKind,
    pub chains: Vec<ChainId>,
    pub assets: Vec<AssetId>,
    pub priority: TxPriority,
    pub state: TxState,
    pub sub_results: Vec<SubOpResult>,
    /// Id of the sibling rollback transaction spawned on failure, if any.
    pub rollback_tx: Option<TxId>,
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,
}

impl CoordinatedTransaction {
    pub fn new(
        kind: TxKind,
        chains: Vec<ChainId>,
        assets: Vec<AssetId>,
        priority: TxPriority,
        now_ms: i64,
    ) -> Self {
        Self {
            id: TxId::generate(),
            kind,
            chains,
            assets,
            priority,
            state: TxState::Pending,
            sub_results: Vec::new(),
            rollback_tx: None,
            failure_reason: None,
            created_at: now_ms,
            started_at: None,
            ended_at: None,
        }
    }

    /// Apply a state transition, enforcing monotonicity.
    pub fn transition(&mut self, next: TxState, now_ms: i64) -> Result<(), CoordinationError> {
        if !self.state.can_transition_to(next) {
            return Err(CoordinationError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if next == TxState::Executing {
            self.started_at = Some(now_ms);
        }
        if next.is_terminal() {
            self.ended_at = Some(now_ms);
        }
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>, now_ms: i64) -> Result<(), CoordinationError> {
        self.failure_reason = Some(reason.into());
        self.transition(TxState::Failed, now_ms)
    }

    pub fn record_sub_op(&mut self, description: impl Into<String>, success: bool, detail: impl Into<String>, at: i64) {
        self.sub_results.push(SubOpResult {
            op_id: Uuid::new_v4(),
            description: description.into(),
            success,
            detail: detail.into(),
            at,
        });
    }

    /// Fraction of sub-operations that succeeded.
    pub fn completion_ratio(&self) -> f64 {
        if self.sub_results.is_empty() {
            return 0.0;
        }
        let ok = self.sub_results.iter().filter(|r| r.success).count();
        ok as f64 / self.sub_results.len() as f64
    }
}

/// Result record of one arbitrage execution, archived to the history log.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageExecution {
    pub tx_id: TxId,
    pub opportunity_id: crate::domain::opportunity::OpportunityId,
    pub size_usd: rust_decimal::Decimal,
    pub realized_profit: rust_decimal::Decimal,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub success: bool,
    pub started_at: i64,
    pub ended_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> CoordinatedTransaction {
        CoordinatedTransaction::new(
            TxKind::Arbitrage,
            vec![ChainId::new("ethereum"), ChainId::new("polygon")],
            vec![AssetId::new("USDC")],
            TxPriority::High,
            1_000,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = tx();
        t.transition(TxState::Coordinating, 1_001).unwrap();
        t.transition(TxState::Executing, 1_002).unwrap();
        assert_eq!(t.started_at, Some(1_002));
        t.transition(TxState::Completed, 1_003).unwrap();
        assert_eq!(t.ended_at, Some(1_003));
        assert!(t.state.is_terminal());
    }

    #[test]
    fn test_state_never_moves_backward() {
        let mut t = tx();
        t.transition(TxState::Coordinating, 0).unwrap();
        t.transition(TxState::Executing, 0).unwrap();
        assert!(t.transition(TxState::Coordinating, 0).is_err());
        assert!(t.transition(TxState::Pending, 0).is_err());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut t = tx();
        t.transition(TxState::Coordinating, 0).unwrap();
        t.fail("bridge outage", 5).unwrap();
        assert_eq!(t.state, TxState::Failed);
        assert_eq!(t.failure_reason.as_deref(), Some("bridge outage"));
        assert!(t.transition(TxState::Executing, 6).is_err());
        assert!(t.transition(TxState::Completed, 6).is_err());
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let mut t = tx();
        assert!(t.transition(TxState::Executing, 0).is_err());
        assert!(t.transition(TxState::Completed, 0).is_err());
    }

    #[test]
    fn test_completion_ratio() {
        let mut t = tx();
        t.record_sub_op("withdraw", true, "ok", 1);
        t.record_sub_op("bridge", true, "ok", 2);
        t.record_sub_op("deposit", false, "reverted", 3);
        assert!((t.completion_ratio() - 2.0 / 3.0).abs() < 1e-9);
    }
}
