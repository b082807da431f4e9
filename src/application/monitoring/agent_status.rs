use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unresponsive,
}

#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub name: String,
    pub status: HealthStatus,
    pub last_heartbeat_ms: i64,
    pub metrics: HashMap<String, String>,
}

/// Heartbeat registry for the engine's long-running agents. Agents beat on
/// an interval; anything silent past the threshold reads as unresponsive.
#[derive(Default)]
pub struct AgentStatusRegistry {
    agents: RwLock<HashMap<String, AgentStatus>>,
}

impl AgentStatusRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn update_heartbeat(&self, name: &str, status: HealthStatus, now_ms: i64) {
        let mut agents = self.agents.write().await;
        let entry = agents.entry(name.to_string()).or_insert_with(|| AgentStatus {
            name: name.to_string(),
            status,
            last_heartbeat_ms: now_ms,
            metrics: HashMap::new(),
        });
        entry.status = status;
        entry.last_heartbeat_ms = now_ms;
    }

    pub async fn update_metric(&self, name: &str, key: &str, value: String) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(name) {
            entry.metrics.insert(key.to_string(), value);
        }
    }

    /// Snapshot with silence detection applied.
    pub async fn snapshot(&self, now_ms: i64, silence_threshold_ms: i64) -> Vec<AgentStatus> {
        let agents = self.agents.read().await;
        let mut out: Vec<AgentStatus> = agents
            .values()
            .map(|a| {
                let mut status = a.clone();
                if now_ms - a.last_heartbeat_ms > silence_threshold_ms {
                    status.status = HealthStatus::Unresponsive;
                }
                status
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silent_agent_reads_unresponsive() {
        let registry = AgentStatusRegistry::new();
        registry.update_heartbeat("detector", HealthStatus::Healthy, 1_000).await;
        registry.update_heartbeat("monitor", HealthStatus::Healthy, 9_000).await;

        let snapshot = registry.snapshot(10_000, 5_000).await;
        assert_eq!(snapshot.len(), 2);
        let detector = snapshot.iter().find(|a| a.name == "detector").unwrap();
        assert_eq!(detector.status, HealthStatus::Unresponsive);
        let monitor = snapshot.iter().find(|a| a.name == "monitor").unwrap();
        assert_eq!(monitor.status, HealthStatus::Healthy);
    }
}
