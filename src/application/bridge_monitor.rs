use crate::config::MonitoringConfig;
use crate::domain::bridge::{BridgeHealthSample, BridgeIncident, BridgeStatus, Severity};
use crate::domain::events::BridgeAlert;
use crate::domain::identifiers::BridgeId;
use crate::domain::ports::{AuditSink, BridgeAdapter};
use statrs::statistics::Statistics;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{info, warn};

const ANOMALY_WINDOW: usize = 32;
const ANOMALY_CONSECUTIVE: u32 = 3;
const EWMA_ALPHA: f64 = 0.2;
/// Minimum absolute excursion; keeps micro-jitter on a flat baseline from
/// counting as anomalous.
const ANOMALY_FLOOR_MS: f64 = 50.0;

/// Response-time anomaly detector: EWMA baseline with a rolling stddev
/// band. A sample above `mean + 3 * stddev` for three consecutive windows
/// confirms an anomaly.
#[derive(Debug, Default)]
struct AnomalyDetector {
    ewma: Option<f64>,
    window: VecDeque<f64>,
    consecutive: u32,
}

impl AnomalyDetector {
    /// Feed one response time; returns true when an anomaly is confirmed.
    /// Exceeding samples do not move the baseline, so a sustained excursion
    /// keeps exceeding it instead of being absorbed.
    fn observe(&mut self, response_time_ms: f64) -> bool {
        let exceeded = if self.window.len() >= 4 {
            let stddev = self.window.iter().copied().std_dev();
            let baseline = self.ewma.unwrap_or(response_time_ms);
            response_time_ms > baseline + (3.0 * stddev).max(ANOMALY_FLOOR_MS)
        } else {
            false
        };

        if exceeded {
            self.consecutive += 1;
            return self.consecutive == ANOMALY_CONSECUTIVE;
        }

        self.consecutive = 0;
        self.ewma = Some(match self.ewma {
            Some(prev) => EWMA_ALPHA * response_time_ms + (1.0 - EWMA_ALPHA) * prev,
            None => response_time_ms,
        });
        self.window.push_back(response_time_ms);
        if self.window.len() > ANOMALY_WINDOW {
            self.window.pop_front();
        }
        false
    }

    fn baseline(&self) -> f64 {
        self.ewma.unwrap_or(0.0)
    }
}

pub type SubscriptionId = u64;

type SubscriberList = Arc<Vec<(SubscriptionId, mpsc::Sender<BridgeAlert>)>>;

/// Per-bridge health monitor: polls adapters on a cadence, maintains
/// `BridgeStatus`, detects latency anomalies, and fans alerts out to
/// subscribers. The subscriber list is copy-on-write so delivery never
/// blocks subscription changes.
pub struct BridgeMonitor {
    adapters: HashMap<BridgeId, Arc<dyn BridgeAdapter>>,
    statuses: RwLock<HashMap<BridgeId, BridgeStatus>>,
    detectors: Mutex<HashMap<BridgeId, AnomalyDetector>>,
    subscribers: RwLock<SubscriberList>,
    next_subscription: AtomicU64,
    alerts: Mutex<VecDeque<BridgeAlert>>,
    incidents: Mutex<Vec<BridgeIncident>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: MonitoringConfig,
}

impl BridgeMonitor {
    pub fn new(
        adapters: Vec<Arc<dyn BridgeAdapter>>,
        config: MonitoringConfig,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        let mut statuses = HashMap::new();
        let mut by_id = HashMap::new();
        for adapter in adapters {
            let id = adapter.bridge();
            statuses.insert(id.clone(), BridgeStatus::new(id.clone()));
            by_id.insert(id, adapter);
        }
        Self {
            adapters: by_id,
            statuses: RwLock::new(statuses),
            detectors: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(Arc::new(Vec::new())),
            next_subscription: AtomicU64::new(1),
            alerts: Mutex::new(VecDeque::new()),
            incidents: Mutex::new(Vec::new()),
            audit,
            config,
        }
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::Receiver<BridgeAlert>) {
        let (tx, rx) = mpsc::channel(64);
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.as_ref().clone();
        next.push((id, tx));
        *guard = Arc::new(next);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut guard = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next: Vec<_> = guard
            .as_ref()
            .iter()
            .filter(|(sub, _)| *sub != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// Register a status slot for a bridge with no adapter, so tests and the
    /// simulation harness can drive `ingest_sample` directly.
    #[cfg(test)]
    pub(crate) fn seed_status(&self, status: BridgeStatus) {
        let mut guard = self
            .statuses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.entry(status.bridge.clone()).or_insert(status);
    }

    pub fn status(&self, bridge: &BridgeId) -> Option<BridgeStatus> {
        let guard = self
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(bridge).cloned()
    }

    pub fn statuses(&self) -> Vec<BridgeStatus> {
        let guard = self
            .statuses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.values().cloned().collect()
    }

    /// Poll every adapter once. Exposed separately from the run loop so the
    /// cadence is owned by the caller and tests can drive time directly.
    pub async fn poll_once(&self, now_ms: i64) {
        for (id, adapter) in &self.adapters {
            let started = std::time::Instant::now();
            let outcome = adapter.health().await;
            let response_time_ms = started.elapsed().as_secs_f64() * 1_000.0;
            let (sample, report) = match outcome {
                Ok(report) => (
                    BridgeHealthSample {
                        ts: now_ms,
                        is_operational: report.is_operational,
                        response_time_ms,
                        errors: Vec::new(),
                    },
                    Some(report),
                ),
                Err(err) => (
                    BridgeHealthSample {
                        ts: now_ms,
                        is_operational: false,
                        response_time_ms,
                        errors: vec![err.to_string()],
                    },
                    None,
                ),
            };
            self.ingest_sample(id, sample, report.as_ref(), now_ms);
        }
        self.expire_alerts(now_ms);
    }

    /// Apply one health sample to the bridge's status and anomaly detector.
    pub fn ingest_sample(
        &self,
        bridge: &BridgeId,
        sample: BridgeHealthSample,
        report: Option<&crate::domain::ports::BridgeHealthReport>,
        now_ms: i64,
    ) {
        let was_operational;
        {
            let mut guard = self
                .statuses
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let Some(status) = guard.get_mut(bridge) else {
                return;
            };
            was_operational = status.is_operational;
            status.is_operational = sample.is_operational;
            status.last_check = sample.ts;
            if let Some(report) = report {
                status.current_tvl = report.current_tvl;
                status.volume_7d = report.volume_7d;
            }
        }

        let (anomaly, baseline) = {
            let mut guard = self
                .detectors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let detector = guard.entry(bridge.clone()).or_default();
            let confirmed = detector.observe(sample.response_time_ms);
            (confirmed, detector.baseline())
        };

        {
            let mut guard = self
                .statuses
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(status) = guard.get_mut(bridge) {
                status.avg_latency_ms = baseline;
                if anomaly && !status.anomaly_flags.iter().any(|f| f == "latency") {
                    status.anomaly_flags.push("latency".to_string());
                } else if !anomaly {
                    status.anomaly_flags.retain(|f| f != "latency");
                }
            }
        }

        if was_operational && !sample.is_operational {
            self.emit_alert(BridgeAlert {
                bridge: bridge.clone(),
                severity: Severity::High,
                message: format!("bridge {} became non-operational", bridge),
                at: now_ms,
            });
        } else if !was_operational && sample.is_operational {
            info!("BridgeMonitor: {} recovered", bridge);
        }

        if anomaly {
            self.emit_alert(BridgeAlert {
                bridge: bridge.clone(),
                severity: Severity::Medium,
                message: format!(
                    "latency anomaly on {}: {:.1}ms against baseline {:.1}ms",
                    bridge, sample.response_time_ms, baseline
                ),
                at: now_ms,
            });
        }
    }

    /// Record an incident into the append-only log and onto the status.
    pub fn record_incident(&self, incident: BridgeIncident) {
        warn!(
            "BridgeMonitor: incident on {}: {:?}/{:?} {}",
            incident.bridge, incident.kind, incident.severity, incident.description
        );
        if let Some(audit) = &self.audit {
            if let Ok(payload) = serde_json::to_value(&incident) {
                if let Err(err) = audit.record("bridge_incident", payload) {
                    warn!("BridgeMonitor: audit write failed: {err:#}");
                }
            }
        }
        {
            let mut guard = self
                .statuses
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(status) = guard.get_mut(&incident.bridge) {
                status.last_incident = Some(incident.clone());
            }
        }
        let severity = incident.severity;
        let bridge = incident.bridge.clone();
        let at = incident.at;
        self.incidents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(incident);
        if severity >= Severity::High {
            self.emit_alert(BridgeAlert {
                bridge,
                severity,
                message: "incident recorded".to_string(),
                at,
            });
        }
    }

    pub fn incidents_for(&self, bridge: &BridgeId) -> Vec<BridgeIncident> {
        self.incidents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|i| &i.bridge == bridge)
            .cloned()
            .collect()
    }

    /// Alerts still inside the retention window.
    pub fn recent_alerts(&self, now_ms: i64) -> Vec<BridgeAlert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|a| now_ms - a.at <= self.config.alert_retention_ms)
            .cloned()
            .collect()
    }

    fn expire_alerts(&self, now_ms: i64) {
        let mut guard = self
            .alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while let Some(front) = guard.front() {
            if now_ms - front.at > self.config.alert_retention_ms {
                guard.pop_front();
            } else {
                break;
            }
        }
    }

    fn emit_alert(&self, alert: BridgeAlert) {
        // Snapshot the list, then deliver without holding any lock.
        let subscribers = {
            let guard = self
                .subscribers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.clone()
        };
        for (_, tx) in subscribers.iter() {
            // Slow consumers miss alerts rather than stalling the monitor.
            let _ = tx.try_send(alert.clone());
        }
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(alert);
    }
}
