use crate::application::bridge_monitor::BridgeMonitor;
use crate::config::RiskScoringConfig;
use crate::domain::bridge::{
    BridgeIncident, BridgeRiskAssessment, BridgeStatus, IncidentKind, RiskLevel, Severity,
};
use crate::domain::events::RiskAlert;
use crate::domain::identifiers::BridgeId;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

const INCIDENT_DECAY_MS: i64 = 30 * 24 * 3_600 * 1_000;

/// Scores every monitored bridge on safety, liquidity, reliability and
/// security, on the configured cadence. Assessments are derived-read-only
/// everywhere else; the planner refuses `Critical` bridges outright.
pub struct RiskAssessor {
    monitor: Arc<BridgeMonitor>,
    config: RiskScoringConfig,
    assessments: RwLock<HashMap<BridgeId, BridgeRiskAssessment>>,
    /// Last observed side of each alert threshold, per (bridge, dimension),
    /// so alerts fire only on crossings.
    threshold_sides: Mutex<HashMap<(BridgeId, &'static str), bool>>,
}

impl RiskAssessor {
    pub fn new(monitor: Arc<BridgeMonitor>, config: RiskScoringConfig) -> Self {
        Self {
            monitor,
            config,
            assessments: RwLock::new(HashMap::new()),
            threshold_sides: Mutex::new(HashMap::new()),
        }
    }

    pub fn assessment(&self, bridge: &BridgeId) -> Option<BridgeRiskAssessment> {
        let guard = self
            .assessments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(bridge).cloned()
    }

    pub fn all(&self) -> Vec<BridgeRiskAssessment> {
        let guard = self
            .assessments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.values().cloned().collect()
    }

    /// A bridge with no assessment yet is treated as usable; the validator's
    /// reachability check still applies.
    pub fn is_usable(&self, bridge: &BridgeId) -> bool {
        self.assessment(bridge)
            .map(|a| a.level != RiskLevel::Critical)
            .unwrap_or(true)
    }

    /// Recompute every bridge and return threshold-crossing alerts for the
    /// caller to publish.
    pub fn recompute_all(&self, now_ms: i64) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();
        for status in self.monitor.statuses() {
            let incidents = self.monitor.incidents_for(&status.bridge);
            let assessment = self.assess(&status, &incidents, now_ms);
            debug!(
                "RiskAssessor: {} overall {:.1} ({:?})",
                status.bridge, assessment.overall_score, assessment.level
            );
            alerts.extend(self.crossings(&assessment, now_ms));
            let mut guard = self
                .assessments
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.insert(status.bridge.clone(), assessment);
        }
        alerts
    }

    fn assess(
        &self,
        status: &BridgeStatus,
        incidents: &[BridgeIncident],
        now_ms: i64,
    ) -> BridgeRiskAssessment {
        let safety = Self::safety_score(incidents, now_ms);
        let liquidity = Self::liquidity_score(status.current_tvl, status.volume_7d);
        let reliability = Self::reliability_score(status);
        let security = Self::security_score(incidents, now_ms);
        BridgeRiskAssessment::from_scores(
            status.bridge.clone(),
            safety,
            liquidity,
            reliability,
            security,
            now_ms,
        )
    }

    /// Incident-driven safety: recent severe incidents dominate, older ones
    /// decay linearly over thirty days.
    fn safety_score(incidents: &[BridgeIncident], now_ms: i64) -> f64 {
        let mut score = 100.0;
        for incident in incidents {
            let age = (now_ms - incident.at).clamp(0, INCIDENT_DECAY_MS);
            let decay = 1.0 - age as f64 / INCIDENT_DECAY_MS as f64;
            let weight = match (incident.kind, incident.severity) {
                (IncidentKind::Exploit, Severity::Critical) => 80.0,
                (IncidentKind::Exploit, _) => 50.0,
                (IncidentKind::Bug, Severity::Critical) => 40.0,
                (IncidentKind::Bug, _) => 20.0,
                (IncidentKind::Downtime, Severity::Critical) => 25.0,
                (IncidentKind::Downtime, _) => 10.0,
                (IncidentKind::Governance, _) => 15.0,
            };
            score -= weight * decay;
        }
        score.clamp(0.0, 100.0)
    }

    /// TVL and weekly volume, saturating at $100M / $50M.
    fn liquidity_score(tvl: Decimal, volume_7d: Decimal) -> f64 {
        let tvl = tvl.to_f64().unwrap_or(0.0);
        let volume = volume_7d.to_f64().unwrap_or(0.0);
        let tvl_part = (tvl / 100_000_000.0).min(1.0) * 70.0;
        let volume_part = (volume / 50_000_000.0).min(1.0) * 30.0;
        tvl_part + volume_part
    }

    /// Operational state, latency baseline and anomaly flags.
    fn reliability_score(status: &BridgeStatus) -> f64 {
        let mut score: f64 = 100.0;
        if !status.is_operational {
            score -= 50.0;
        }
        if status.avg_latency_ms > 5_000.0 {
            score -= 25.0;
        } else if status.avg_latency_ms > 1_000.0 {
            score -= 10.0;
        }
        score -= 15.0 * status.anomaly_flags.len() as f64;
        score.clamp(0.0, 100.0)
    }

    /// Exploit and bug history stands in for audit posture.
    fn security_score(incidents: &[BridgeIncident], now_ms: i64) -> f64 {
        let mut score = 90.0;
        for incident in incidents {
            let age = (now_ms - incident.at).clamp(0, INCIDENT_DECAY_MS);
            let decay = 1.0 - age as f64 / INCIDENT_DECAY_MS as f64;
            match incident.kind {
                IncidentKind::Exploit => score -= 60.0 * decay,
                IncidentKind::Bug => score -= 25.0 * decay,
                _ => {}
            }
        }
        score.clamp(0.0, 100.0)
    }

    /// Alerts for every monitored dimension whose score changed side of its
    /// configured threshold since the previous recompute.
    fn crossings(&self, assessment: &BridgeRiskAssessment, now_ms: i64) -> Vec<RiskAlert> {
        let thresholds = [
            ("safety", assessment.safety_score, self.config.alert_thresholds.safety),
            (
                "liquidity",
                assessment.liquidity_score,
                self.config.alert_thresholds.liquidity,
            ),
            (
                "reliability",
                assessment.reliability_score,
                self.config.alert_thresholds.reliability,
            ),
        ];

        let mut alerts = Vec::new();
        let mut sides = self
            .threshold_sides
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (dimension, score, threshold) in thresholds {
            let above = score >= threshold;
            let key = (assessment.bridge.clone(), dimension);
            match sides.insert(key, above) {
                Some(prev) if prev != above => {
                    info!(
                        "RiskAssessor: {} {} crossed threshold {:.0} ({} -> {:.1})",
                        assessment.bridge,
                        dimension,
                        threshold,
                        if above { "recovered" } else { "breached" },
                        score
                    );
                    alerts.push(RiskAlert {
                        bridge: assessment.bridge.clone(),
                        dimension: dimension.to_string(),
                        score,
                        threshold,
                        recovered: above,
                        at: now_ms,
                    });
                }
                Some(_) => {}
                // First observation never alerts; it only records the side.
                None => {}
            }
        }
        alerts
    }
}
