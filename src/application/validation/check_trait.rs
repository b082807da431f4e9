use crate::config::ValidationConfig;
use crate::domain::bridge::BridgeStatus;
use crate::domain::market::PriceSample;
use crate::domain::opportunity::{ArbitrageOpportunity, ExecutionPath};
use rust_decimal::Decimal;

/// Result of one validation check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResult {
    /// Check passed unchanged.
    Pass,
    /// Check passed but adjusted the expected profit (e.g. slippage cost).
    PassAdjusted { adjusted_profit: Decimal, note: String },
    /// Check failed; the reason terminates the pipeline verdict.
    Fail(String),
}

impl CheckResult {
    pub fn is_pass(&self) -> bool {
        !matches!(self, CheckResult::Fail(_))
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            CheckResult::Fail(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Context shared by all checks for one candidate.
///
/// Checks are pure and CPU-bound: everything they need is gathered up front
/// so the pipeline never suspends.
#[derive(Debug)]
pub struct CheckContext<'a> {
    pub opportunity: &'a ArbitrageOpportunity,
    /// The preferred path (first in the opportunity's ranked order).
    pub path: &'a ExecutionPath,
    pub source_sample: &'a PriceSample,
    pub target_sample: &'a PriceSample,
    /// Monitor view of the path's bridge, if it is being monitored.
    pub bridge_status: Option<&'a BridgeStatus>,
    /// Profit running total, updated as checks adjust it.
    pub running_profit: Decimal,
    pub config: &'a ValidationConfig,
    pub now_ms: i64,
}

/// One ordered validation rule. Checks run in ascending `order` and the
/// first failure decides the verdict; later checks still run to collect
/// their reasons, but cannot overturn it.
pub trait OpportunityCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn order(&self) -> u8;

    fn check(&self, ctx: &CheckContext<'_>) -> CheckResult;
}
