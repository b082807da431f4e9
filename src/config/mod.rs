//! Configuration for the satellite: a single typed `Config` assembled from
//! environment variables plus a TOML chain/bridge/asset registry, passed at
//! construction and atomically swappable at runtime.

mod engine_config;
mod registry;
mod service_config;

pub use engine_config::{ArbitrageConfig, DetectorVariant, LiquidityConfig, ValidationConfig};
pub use registry::{AssetEntry, BridgeConfig, ChainConfig, Registry, TokenDeployment};
pub use service_config::{
    CoordinationConfig, MonitoringConfig, ObservabilityConfig, RiskAlertThresholds,
    RiskScoringConfig, SecurityConfig, SyncConfig,
};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Execution mode: live adapters or in-process simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Live,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "live" => Ok(Mode::Live),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'live'", s),
        }
    }
}

/// Aggregated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub registry: Registry,
    pub arbitrage: ArbitrageConfig,
    pub validation: ValidationConfig,
    pub liquidity: LiquidityConfig,
    pub monitoring: MonitoringConfig,
    pub risk: RiskScoringConfig,
    pub coordination: CoordinationConfig,
    pub sync: SyncConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load everything from the environment and the registry file named by
    /// `REGISTRY_PATH` (or the given override).
    pub fn load(registry_path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let registry = match registry_path {
            Some(path) => Registry::load(path)?,
            None => {
                let path = std::env::var("REGISTRY_PATH")
                    .context("REGISTRY_PATH is required when no registry file is given")?;
                Registry::load(Path::new(&path))?
            }
        };

        let config = Self {
            mode: std::env::var("MODE")
                .unwrap_or_else(|_| "mock".to_string())
                .parse()?,
            registry,
            arbitrage: ArbitrageConfig::from_env()?,
            validation: ValidationConfig::from_env()?,
            liquidity: LiquidityConfig::from_env()?,
            monitoring: MonitoringConfig::from_env()?,
            risk: RiskScoringConfig::from_env()?,
            coordination: CoordinationConfig::from_env()?,
            sync: SyncConfig::from_env()?,
            security: SecurityConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Assemble a config from parts, for tests and simulation.
    pub fn for_registry(registry: Registry) -> Self {
        let mut config = Self {
            mode: Mode::Mock,
            registry,
            arbitrage: ArbitrageConfig::default(),
            validation: ValidationConfig::default(),
            liquidity: LiquidityConfig::default(),
            monitoring: MonitoringConfig::default(),
            risk: RiskScoringConfig::default(),
            coordination: CoordinationConfig::default(),
            sync: SyncConfig::default(),
            security: SecurityConfig::default(),
            observability: ObservabilityConfig::default(),
        };
        // With no explicit enablement, every configured chain is enabled.
        config.arbitrage.enabled_chains = config.registry.chain_ids();
        config
    }

    /// Structural checks: enabled chains must be configured, utilization
    /// bounds ordered, distributions sane.
    pub fn validate(&self) -> Result<()> {
        for chain in &self.arbitrage.enabled_chains {
            if !self.registry.has_chain(chain) {
                anyhow::bail!("Enabled chain '{chain}' is not in the registry");
            }
        }
        if self.liquidity.min_utilization > self.liquidity.max_utilization {
            anyhow::bail!(
                "min_utilization {} exceeds max_utilization {}",
                self.liquidity.min_utilization,
                self.liquidity.max_utilization
            );
        }
        for (chain, frac) in &self.liquidity.target_distribution {
            if !self.registry.has_chain(chain) {
                anyhow::bail!("Target distribution names unknown chain '{chain}'");
            }
            if *frac < rust_decimal::Decimal::ZERO || *frac > rust_decimal::Decimal::ONE {
                anyhow::bail!("Target fraction for '{chain}' out of [0, 1]: {frac}");
            }
        }
        Ok(())
    }
}

/// Handle to the active configuration. `reload` swaps atomically; components
/// re-read on their next tick.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn reload(&self, config: Config) -> Result<()> {
        config.validate()?;
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identifiers::ChainId;
    use rust_decimal_macros::dec;

    fn sample_registry() -> Registry {
        Registry::from_toml_str(
            r#"
[[chains]]
id = "ethereum"
name = "Ethereum"
rpc_endpoint = "http://localhost:8545"
gas_token = "ETH"
block_time_ms = 12000
finality_depth = 64
native_decimals = 18
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_enabled_chains_must_be_configured() {
        let mut config = Config::for_registry(sample_registry());
        assert!(config.validate().is_ok());

        config.arbitrage.enabled_chains.push(ChainId::new("base"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_target_distribution_bounds() {
        let mut config = Config::for_registry(sample_registry());
        config
            .liquidity
            .target_distribution
            .insert(ChainId::new("ethereum"), dec!(1.5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reload_swaps_atomically() {
        let shared = SharedConfig::new(Config::for_registry(sample_registry()));
        assert_eq!(shared.current().coordination.max_concurrent_transactions, 3);

        let mut next = Config::for_registry(sample_registry());
        next.coordination.max_concurrent_transactions = 5;
        shared.reload(next).unwrap();
        assert_eq!(shared.current().coordination.max_concurrent_transactions, 5);
    }
}
