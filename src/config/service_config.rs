//! Monitoring, risk-scoring, coordination, synchronization, security and
//! observability configuration.

use super::engine_config::{parse_bool, parse_decimal, parse_f64, parse_i64, parse_u64, parse_usize};
use anyhow::Result;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub update_interval_ms: u64,
    pub alert_retention_ms: i64,
    pub performance_window_ms: i64,
}

impl MonitoringConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            update_interval_ms: parse_u64("MONITORING_UPDATE_INTERVAL_MS", 30_000)?,
            alert_retention_ms: parse_i64("ALERT_RETENTION_MS", 3_600_000)?,
            performance_window_ms: parse_i64("PERFORMANCE_WINDOW_MS", 300_000)?,
        })
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 30_000,
            alert_retention_ms: 3_600_000,
            performance_window_ms: 300_000,
        }
    }
}

/// Thresholds below which a risk sub-score raises an alert.
#[derive(Debug, Clone)]
pub struct RiskAlertThresholds {
    pub safety: f64,
    pub liquidity: f64,
    pub reliability: f64,
}

#[derive(Debug, Clone)]
pub struct RiskScoringConfig {
    pub update_interval_ms: u64,
    pub alert_thresholds: RiskAlertThresholds,
}

impl RiskScoringConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            update_interval_ms: parse_u64("RISK_UPDATE_INTERVAL_MS", 60_000)?,
            alert_thresholds: RiskAlertThresholds {
                safety: parse_f64("RISK_ALERT_SAFETY", 80.0)?,
                liquidity: parse_f64("RISK_ALERT_LIQUIDITY", 70.0)?,
                reliability: parse_f64("RISK_ALERT_RELIABILITY", 85.0)?,
            },
        })
    }
}

impl Default for RiskScoringConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 60_000,
            alert_thresholds: RiskAlertThresholds {
                safety: 80.0,
                liquidity: 70.0,
                reliability: 85.0,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinationConfig {
    /// Ceiling on transactions in {coordinating, executing} at once.
    pub max_concurrent_transactions: usize,
    pub queue_capacity: usize,
    pub emergency_drain_timeout_s: u64,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    /// Fraction of sub-operations that must succeed for a partial execution
    /// to be accepted.
    pub partial_execution_threshold: f64,
    /// Portfolio view cache lifetime.
    pub portfolio_cache_ms: i64,
}

impl CoordinationConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_concurrent_transactions: parse_usize("MAX_CONCURRENT_TRANSACTIONS", 3)?,
            queue_capacity: parse_usize("TX_QUEUE_CAPACITY", 16)?,
            emergency_drain_timeout_s: parse_u64("EMERGENCY_DRAIN_TIMEOUT_S", 60)?,
            max_retries: parse_u64("STEP_MAX_RETRIES", 3)? as u32,
            retry_initial_delay_ms: parse_u64("STEP_RETRY_INITIAL_DELAY_MS", 1_000)?,
            partial_execution_threshold: parse_f64("PARTIAL_EXECUTION_THRESHOLD", 0.5)?,
            portfolio_cache_ms: parse_i64("PORTFOLIO_CACHE_MS", 30_000)?,
        })
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transactions: 3,
            queue_capacity: 16,
            emergency_drain_timeout_s: 60,
            max_retries: 3,
            retry_initial_delay_ms: 1_000,
            partial_execution_threshold: 0.5,
            portfolio_cache_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Total confidence required to resolve a conflict by weighted average.
    pub min_consensus_threshold: f64,
    pub min_chains_for_operation: usize,
    /// Timestamp drift beyond which a sync anomaly is raised.
    pub max_drift_ms: i64,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            min_consensus_threshold: parse_f64("MIN_CONSENSUS_THRESHOLD", 0.67)?,
            min_chains_for_operation: parse_usize("MIN_CHAINS_FOR_OPERATION", 2)?,
            max_drift_ms: parse_i64("SYNC_MAX_DRIFT_MS", 5_000)?,
        })
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_consensus_threshold: 0.67,
            min_chains_for_operation: 2,
            max_drift_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub enable_audit_logging: bool,
    pub require_multisig: bool,
    pub max_transaction_value_usd: Decimal,
    /// Fraction of portfolio value moved in one window that counts as
    /// suspicious.
    pub suspicious_activity_threshold: Decimal,
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enable_audit_logging: parse_bool("ENABLE_AUDIT_LOGGING", true),
            require_multisig: parse_bool("REQUIRE_MULTISIG", true),
            max_transaction_value_usd: parse_decimal("MAX_TRANSACTION_VALUE_USD", 10_000_000.0)?,
            suspicious_activity_threshold: parse_decimal("SUSPICIOUS_ACTIVITY_THRESHOLD", 0.1)?,
        })
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_audit_logging: true,
            require_multisig: true,
            max_transaction_value_usd: Decimal::from(10_000_000),
            suspicious_activity_threshold: Decimal::new(1, 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_filter: String,
    pub metrics_enabled: bool,
    pub heartbeat_interval_ms: u64,
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_filter: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_enabled: parse_bool("METRICS_ENABLED", true),
            heartbeat_interval_ms: parse_u64("HEARTBEAT_INTERVAL_MS", 5_000)?,
        })
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            metrics_enabled: true,
            heartbeat_interval_ms: 5_000,
        }
    }
}
