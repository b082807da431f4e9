use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised at the RPC / bridge / signer boundary.
///
/// These are the only errors the execution planner retries; everything else
/// terminates its evaluation path immediately.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("RPC timeout after {duration_ms}ms")]
    RpcTimeout { duration_ms: u64 },

    #[error("Insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("Nonce conflict on {chain}")]
    NonceConflict { chain: ChainId },

    #[error("Transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("Signer unavailable: {reason}")]
    SignerUnavailable { reason: String },

    #[error("Bridge {bridge} is not operational")]
    BridgeOutage { bridge: BridgeId },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },
}

impl AdapterError {
    /// Whether the planner's retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::RpcTimeout { .. }
                | AdapterError::NonceConflict { .. }
                | AdapterError::Transport { .. }
        )
    }
}

/// Lookup failures against the configured chain/bridge/asset registries.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Unknown chain: {chain}")]
    ChainUnknown { chain: ChainId },

    #[error("Unknown bridge: {bridge}")]
    BridgeUnknown { bridge: BridgeId },

    #[error("Unknown asset: {asset}")]
    AssetUnknown { asset: AssetId },
}

/// Errors produced while detecting, validating or scoring opportunities.
/// Never retried.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    #[error("Stale price data: age {age_ms}ms > limit {max_age_ms}ms")]
    StaleData { age_ms: i64, max_age_ms: i64 },

    #[error("Insufficient liquidity: required ${required}, available ${available}")]
    InsufficientLiquidity {
        required: Decimal,
        available: Decimal,
    },

    #[error("Simulated slippage {simulated_pct:.4} exceeds tolerance {max_pct:.4}")]
    SlippageExceeded { simulated_pct: f64, max_pct: f64 },

    #[error("No bridge connects {source_chain} -> {target} for {asset}")]
    NoPath {
        asset: AssetId,
        source_chain: ChainId,
        target: ChainId,
    },
}

/// Errors owned by the portfolio coordinator.
#[derive(Debug, Clone, Error)]
pub enum CoordinationError {
    #[error("Position ({chain}, {asset}) is locked by another transaction")]
    ResourceBusy { chain: ChainId, asset: AssetId },

    #[error("Transaction queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    #[error("Deadline exceeded: {elapsed_s}s > {limit_s}s")]
    DeadlineExceeded { elapsed_s: u64, limit_s: u64 },

    #[error("Risk limit violated: {description}")]
    RiskLimitViolated { description: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Coordinator is stopped: {reason}")]
    Stopped { reason: String },

    #[error("Invariant violated: {invariant}")]
    InvariantViolated { invariant: String },

    #[error("Multisig approval denied for transaction {tx_id}")]
    ApprovalDenied { tx_id: String },

    #[error("No sufficient position on ({chain}, {asset})")]
    InsufficientPosition { chain: ChainId, asset: AssetId },
}

/// Errors produced by the execution planner and rollback machinery.
#[derive(Debug, Clone, Error)]
pub enum PlanningError {
    #[error("Dependency cycle involving step {step}")]
    DependencyCycle { step: u32 },

    #[error("Rollback failed: {reason}")]
    RollbackFailed { reason: String },

    #[error("No usable bridge for {asset} between {source_chain} and {target}")]
    NoUsableBridge {
        asset: AssetId,
        source_chain: ChainId,
        target: ChainId,
    },

    #[error("Move of ${amount} cannot be split within slippage tolerance")]
    Unsplittable { amount: Decimal },
}

/// Errors from the cross-chain synchronizer.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(
        "Consensus conflict on ({chain_a}, {chain_b}) for {asset}: total confidence {confidence:.2} below threshold"
    )]
    ConsensusConflict {
        chain_a: ChainId,
        chain_b: ChainId,
        asset: AssetId,
        confidence: f64,
    },

    #[error("Only {healthy} healthy chains, {required} required for sync")]
    InsufficientChains { healthy: usize, required: usize },
}
