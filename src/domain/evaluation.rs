use crate::domain::bridge::Severity;
use crate::domain::opportunity::OpportunityId;
use rust_decimal::Decimal;
use serde::Serialize;

/// Output of the opportunity validator pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub opportunity: OpportunityId,
    pub is_valid: bool,
    /// Rejection (or caution) reasons in check order.
    pub reasons: Vec<String>,
    /// Expected profit after slippage and gas adjustments.
    pub adjusted_profit: Decimal,
    pub risk_score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeasibilityLevel {
    VeryLow,
    Low,
    Medium,
    High,
}

impl FeasibilityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            FeasibilityLevel::High
        } else if score >= 60.0 {
            FeasibilityLevel::Medium
        } else if score >= 40.0 {
            FeasibilityLevel::Low
        } else {
            FeasibilityLevel::VeryLow
        }
    }
}

/// How much of the execution window remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Immediate,
    Urgent,
    Moderate,
    Flexible,
}

/// A limiting factor surfaced by the feasibility analyzer.
#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub component: String,
    pub severity: Severity,
    pub description: String,
}

/// Concrete fallback shapes when full-size immediate execution is infeasible.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAlternative {
    ReducedSize { factor: Decimal },
    SplitExecution { chunks: u32 },
    DelayedExecution { delay_s: u64 },
}

/// Output of the feasibility analyzer: four component scores in [0, 100],
/// blended 0.3 / 0.25 / 0.25 / 0.2.
#[derive(Debug, Clone, Serialize)]
pub struct FeasibilityReport {
    pub opportunity: OpportunityId,
    pub technical: f64,
    pub resource: f64,
    pub timing: f64,
    pub infrastructure: f64,
    pub overall: f64,
    pub level: FeasibilityLevel,
    pub urgency: Urgency,
    /// Sorted by severity, most severe first.
    pub bottlenecks: Vec<Bottleneck>,
    pub alternatives: Vec<ExecutionAlternative>,
}

impl FeasibilityReport {
    pub const W_TECHNICAL: f64 = 0.30;
    pub const W_RESOURCE: f64 = 0.25;
    pub const W_TIMING: f64 = 0.25;
    pub const W_INFRASTRUCTURE: f64 = 0.20;

    pub fn blend(technical: f64, resource: f64, timing: f64, infrastructure: f64) -> f64 {
        technical * Self::W_TECHNICAL
            + resource * Self::W_RESOURCE
            + timing * Self::W_TIMING
            + infrastructure * Self::W_INFRASTRUCTURE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationPriority {
    Ignore,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    ExecuteImmediately,
    ExecuteOptimized,
    Defer,
    Cancel,
}

/// Final aggregate judgment over an opportunity. Produced by a pure
/// evaluator: equal inputs always yield equal outputs.
#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveEvaluation {
    pub opportunity: OpportunityId,
    pub final_score: f64,
    pub priority: EvaluationPriority,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}
