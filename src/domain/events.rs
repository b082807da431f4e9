use crate::domain::bridge::Severity;
use crate::domain::coordination::{ArbitrageExecution, TxId};
use crate::domain::evaluation::ComprehensiveEvaluation;
use crate::domain::identifiers::{BridgeId, ChainId};
use crate::domain::opportunity::ArbitrageOpportunity;
use serde::Serialize;

/// Degraded-bridge notification fanned out by the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeAlert {
    pub bridge: BridgeId,
    pub severity: Severity,
    pub message: String,
    pub at: i64,
}

/// A risk sub-score crossing its configured threshold, in either direction.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub bridge: BridgeId,
    pub dimension: String,
    pub score: f64,
    pub threshold: f64,
    /// True when the score recovered above the threshold.
    pub recovered: bool,
    pub at: i64,
}

/// Anything the synchronizer could not reconcile silently.
#[derive(Debug, Clone, Serialize)]
pub struct SyncAnomaly {
    pub chain: Option<ChainId>,
    pub description: String,
    pub at: i64,
}

/// Everything the engine publishes on its broadcast bus. Consumers run on
/// their own tasks and receive in FIFO order per producer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SatelliteEvent {
    OpportunityDetected(Box<ArbitrageOpportunity>),
    OpportunityEvaluated(Box<ComprehensiveEvaluation>),
    ExecutionCompleted(Box<ArbitrageExecution>),
    ExecutionFailed { tx_id: TxId, reason: String },
    BridgeAlert(BridgeAlert),
    RiskAlert(RiskAlert),
    SyncAnomaly(SyncAnomaly),
    EmergencyStop { reason: String, at: i64 },
}

impl SatelliteEvent {
    /// Short tag for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            SatelliteEvent::OpportunityDetected(_) => "opportunity_detected",
            SatelliteEvent::OpportunityEvaluated(_) => "opportunity_evaluated",
            SatelliteEvent::ExecutionCompleted(_) => "execution_completed",
            SatelliteEvent::ExecutionFailed { .. } => "execution_failed",
            SatelliteEvent::BridgeAlert(_) => "bridge_alert",
            SatelliteEvent::RiskAlert(_) => "risk_alert",
            SatelliteEvent::SyncAnomaly(_) => "sync_anomaly",
            SatelliteEvent::EmergencyStop { .. } => "emergency_stop",
        }
    }
}
