use crate::domain::identifiers::BridgeId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Incident classification per the bridge incident log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Exploit,
    Bug,
    Downtime,
    Governance,
}

/// Shared severity scale for incidents, alerts and risk limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A recorded bridge incident, retained in the append-only incident log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeIncident {
    pub bridge: BridgeId,
    pub kind: IncidentKind,
    pub severity: Severity,
    pub description: String,
    pub at: i64,
}

/// One health poll result.
#[derive(Debug, Clone)]
pub struct BridgeHealthSample {
    pub ts: i64,
    pub is_operational: bool,
    pub response_time_ms: f64,
    pub errors: Vec<String>,
}

/// Rolling view of a bridge, owned by the `BridgeMonitor`.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub bridge: BridgeId,
    pub is_operational: bool,
    pub current_tvl: Decimal,
    pub volume_7d: Decimal,
    pub avg_latency_ms: f64,
    pub anomaly_flags: Vec<String>,
    pub last_incident: Option<BridgeIncident>,
    /// Timestamp of the most recent successful poll.
    pub last_check: i64,
}

impl BridgeStatus {
    pub fn new(bridge: BridgeId) -> Self {
        Self {
            bridge,
            is_operational: false,
            current_tvl: Decimal::ZERO,
            volume_7d: Decimal::ZERO,
            avg_latency_ms: 0.0,
            anomaly_flags: Vec::new(),
            last_incident: None,
            last_check: 0,
        }
    }

    /// Operational and polled within `window_ms`.
    pub fn reachable_within(&self, now_ms: i64, window_ms: i64) -> bool {
        self.is_operational && now_ms - self.last_check <= window_ms
    }
}

/// Bucketed risk classification derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Threshold mapping: >= 80 low, >= 60 medium, >= 40 high, else critical.
    pub fn from_score(overall: f64) -> Self {
        if overall >= 80.0 {
            RiskLevel::Low
        } else if overall >= 60.0 {
            RiskLevel::Medium
        } else if overall >= 40.0 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Periodic scoring of one bridge across four dimensions, each in [0, 100].
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRiskAssessment {
    pub bridge: BridgeId,
    pub safety_score: f64,
    pub liquidity_score: f64,
    pub reliability_score: f64,
    pub security_score: f64,
    pub overall_score: f64,
    pub level: RiskLevel,
    pub assessed_at: i64,
}

impl BridgeRiskAssessment {
    pub const W_SAFETY: f64 = 0.35;
    pub const W_LIQUIDITY: f64 = 0.25;
    pub const W_RELIABILITY: f64 = 0.25;
    pub const W_SECURITY: f64 = 0.15;

    pub fn from_scores(
        bridge: BridgeId,
        safety: f64,
        liquidity: f64,
        reliability: f64,
        security: f64,
        assessed_at: i64,
    ) -> Self {
        let overall = safety * Self::W_SAFETY
            + liquidity * Self::W_LIQUIDITY
            + reliability * Self::W_RELIABILITY
            + security * Self::W_SECURITY;
        Self {
            bridge,
            safety_score: safety,
            liquidity_score: liquidity,
            reliability_score: reliability,
            security_score: security,
            overall_score: overall,
            level: RiskLevel::from_score(overall),
            assessed_at,
        }
    }
}
