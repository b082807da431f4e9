//! Detection, validation and liquidity configuration parsed from
//! environment variables.

use crate::domain::identifiers::ChainId;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::env;

/// Threshold personality of the detection pipeline. Variants differ only in
/// thresholds, never in dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorVariant {
    #[default]
    Default,
    Conservative,
    Aggressive,
}

impl std::str::FromStr for DetectorVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(DetectorVariant::Default),
            "conservative" => Ok(DetectorVariant::Conservative),
            "aggressive" => Ok(DetectorVariant::Aggressive),
            _ => anyhow::bail!(
                "Invalid DETECTOR_VARIANT: {}. Must be 'default', 'conservative', or 'aggressive'",
                s
            ),
        }
    }
}

impl DetectorVariant {
    /// Multiplier applied to the profit threshold for this variant.
    pub fn profit_threshold_factor(&self) -> Decimal {
        match self {
            DetectorVariant::Default => Decimal::ONE,
            DetectorVariant::Conservative => Decimal::TWO,
            DetectorVariant::Aggressive => Decimal::new(5, 1), // 0.5
        }
    }

    /// Risk ceiling adjustment in score points.
    pub fn risk_score_adjustment(&self) -> f64 {
        match self {
            DetectorVariant::Default => 0.0,
            DetectorVariant::Conservative => -15.0,
            DetectorVariant::Aggressive => 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    /// Minimum relative price difference for a candidate, as a fraction.
    pub min_profit_threshold: Decimal,
    /// Opportunities scoring above this risk are discarded.
    pub max_risk_score: f64,
    pub max_execution_time_s: u64,
    /// Chains detection may trade on; must be a subset of configured chains.
    pub enabled_chains: Vec<ChainId>,
    /// Per-asset scan coalescing window.
    pub scan_coalesce_ms: u64,
    pub variant: DetectorVariant,
}

impl ArbitrageConfig {
    pub fn from_env() -> Result<Self> {
        let enabled = env::var("ENABLED_CHAINS").unwrap_or_default();
        let enabled_chains = if enabled.is_empty() {
            vec![]
        } else {
            enabled.split(',').map(|s| ChainId::new(s.trim())).collect()
        };

        Ok(Self {
            min_profit_threshold: parse_decimal("MIN_PROFIT_THRESHOLD", 0.001)?,
            max_risk_score: parse_f64("MAX_RISK_SCORE", 70.0)?,
            max_execution_time_s: parse_u64("MAX_EXECUTION_TIME_S", 300)?,
            enabled_chains,
            scan_coalesce_ms: parse_u64("SCAN_COALESCE_MS", 50)?,
            variant: env::var("DETECTOR_VARIANT")
                .unwrap_or_else(|_| "default".to_string())
                .parse()?,
        })
    }

    /// Threshold after applying the variant factor.
    pub fn effective_profit_threshold(&self) -> Decimal {
        self.min_profit_threshold * self.variant.profit_threshold_factor()
    }

    pub fn effective_max_risk_score(&self) -> f64 {
        (self.max_risk_score + self.variant.risk_score_adjustment()).clamp(0.0, 100.0)
    }
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: Decimal::new(1, 3), // 0.001
            max_risk_score: 70.0,
            max_execution_time_s: 300,
            enabled_chains: vec![],
            scan_coalesce_ms: 50,
            variant: DetectorVariant::Default,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Maximum tolerated simulated slippage, as a fraction.
    pub max_slippage_tolerance: Decimal,
    pub min_liquidity_usd: Decimal,
    pub max_price_age_ms: i64,
    /// Profit at or above this requires an MEV-protected path.
    pub mev_protection_threshold_usd: Decimal,
    /// Multiplier applied to gas estimates before the headroom check.
    pub simulation_gas_buffer: Decimal,
    /// Gas budget available per execution, in USD.
    pub gas_budget_usd: Decimal,
}

impl ValidationConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            max_slippage_tolerance: parse_decimal("MAX_SLIPPAGE_TOLERANCE", 0.02)?,
            min_liquidity_usd: parse_decimal("MIN_LIQUIDITY_USD", 100_000.0)?,
            max_price_age_ms: parse_i64("MAX_PRICE_AGE_MS", 30_000)?,
            mev_protection_threshold_usd: parse_decimal("MEV_PROTECTION_THRESHOLD_USD", 100.0)?,
            simulation_gas_buffer: parse_decimal("SIMULATION_GAS_BUFFER", 1.2)?,
            gas_budget_usd: parse_decimal("GAS_BUDGET_USD", 500.0)?,
        })
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_slippage_tolerance: Decimal::new(2, 2),
            min_liquidity_usd: Decimal::from(100_000),
            max_price_age_ms: 30_000,
            mev_protection_threshold_usd: Decimal::from(100),
            simulation_gas_buffer: Decimal::new(12, 1),
            gas_budget_usd: Decimal::from(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiquidityConfig {
    /// Per-chain drift triggering a rebalance, as a fraction.
    pub rebalance_threshold: Decimal,
    pub min_utilization: Decimal,
    pub max_utilization: Decimal,
    /// Target fraction per chain; parsed from "chain:frac,chain:frac".
    pub target_distribution: HashMap<ChainId, Decimal>,
    pub max_chain_concentration: Decimal,
    pub max_asset_concentration: Decimal,
    /// Minimum fraction of each asset kept liquid (not locked).
    pub min_asset_liquidity_fraction: Decimal,
    pub max_bridge_exposure: Decimal,
    pub rebalance_deadline_s: u64,
}

impl LiquidityConfig {
    pub fn from_env() -> Result<Self> {
        let raw = env::var("TARGET_DISTRIBUTION").unwrap_or_default();
        let mut target_distribution = HashMap::new();
        for entry in raw.split(',').filter(|s| !s.is_empty()) {
            let (chain, frac) = entry
                .split_once(':')
                .context("TARGET_DISTRIBUTION entries must be chain:fraction")?;
            let frac: Decimal = frac
                .trim()
                .parse()
                .context("Failed to parse TARGET_DISTRIBUTION fraction")?;
            target_distribution.insert(ChainId::new(chain.trim()), frac);
        }

        Ok(Self {
            rebalance_threshold: parse_decimal("REBALANCE_THRESHOLD", 0.1)?,
            min_utilization: parse_decimal("MIN_UTILIZATION", 0.1)?,
            max_utilization: parse_decimal("MAX_UTILIZATION", 0.8)?,
            target_distribution,
            max_chain_concentration: parse_decimal("MAX_CHAIN_CONCENTRATION", 0.6)?,
            max_asset_concentration: parse_decimal("MAX_ASSET_CONCENTRATION", 0.5)?,
            min_asset_liquidity_fraction: parse_decimal("MIN_ASSET_LIQUIDITY_FRACTION", 0.05)?,
            max_bridge_exposure: parse_decimal("MAX_BRIDGE_EXPOSURE", 0.25)?,
            rebalance_deadline_s: parse_u64("REBALANCE_DEADLINE_S", 900)?,
        })
    }
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            rebalance_threshold: Decimal::new(1, 1),
            min_utilization: Decimal::new(1, 1),
            max_utilization: Decimal::new(8, 1),
            target_distribution: HashMap::new(),
            max_chain_concentration: Decimal::new(6, 1),
            max_asset_concentration: Decimal::new(5, 1),
            min_asset_liquidity_fraction: Decimal::new(5, 2),
            max_bridge_exposure: Decimal::new(25, 2),
            rebalance_deadline_s: 900,
        }
    }
}

pub(crate) fn parse_f64(key: &str, default: f64) -> Result<f64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<f64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_i64(key: &str, default: i64) -> Result<i64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<i64>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_usize(key: &str, default: usize) -> Result<usize> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<usize>()
        .context(format!("Failed to parse {}", key))
}

pub(crate) fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

pub(crate) fn parse_decimal(key: &str, default: f64) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<Decimal>()
            .context(format!("Failed to parse {}", key)),
        Err(_) => Decimal::from_f64(default)
            .context(format!("Invalid default for {}", key)),
    }
}
