//! Chain, bridge and asset registry, loaded from a TOML file at startup.

use crate::domain::errors::RegistryError;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// Static description of one configured chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub rpc_endpoint: String,
    pub gas_token: AssetId,
    pub block_time_ms: u64,
    pub finality_depth: u32,
    pub native_decimals: u32,
}

/// Static description of one configured bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub id: BridgeId,
    pub name: String,
    pub supported_chains: Vec<ChainId>,
    pub fee_base_usd: Decimal,
    /// Variable fee as a fraction of the bridged amount.
    pub fee_variable_pct: Decimal,
    pub supported_assets: Vec<AssetId>,
}

impl BridgeConfig {
    pub fn connects(&self, a: &ChainId, b: &ChainId) -> bool {
        self.supported_chains.contains(a) && self.supported_chains.contains(b)
    }

    pub fn carries(&self, asset: &AssetId) -> bool {
        self.supported_assets.contains(asset)
    }

    /// Fee for bridging `amount_usd` of value.
    pub fn fee_for(&self, amount_usd: Decimal) -> Decimal {
        self.fee_base_usd + amount_usd * self.fee_variable_pct
    }
}

/// Per-chain token deployment of a canonical asset.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenDeployment {
    pub chain: ChainId,
    pub address: String,
    pub decimals: u32,
}

/// Canonical asset entry with its per-chain deployments.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub id: AssetId,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tokens: Vec<TokenDeployment>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    chains: Vec<ChainConfig>,
    #[serde(default)]
    bridges: Vec<BridgeConfig>,
    #[serde(default)]
    assets: Vec<AssetEntry>,
}

/// Immutable lookup tables over the configured chains, bridges and assets.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    chains: HashMap<ChainId, ChainConfig>,
    bridges: HashMap<BridgeId, BridgeConfig>,
    assets: Vec<AssetEntry>,
}

impl Registry {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(raw).context("Failed to parse registry TOML")?;
        let mut seen = HashSet::new();
        for chain in &file.chains {
            if !seen.insert(chain.id.clone()) {
                anyhow::bail!("Duplicate chain id in registry: {}", chain.id);
            }
        }
        Ok(Self {
            chains: file.chains.into_iter().map(|c| (c.id.clone(), c)).collect(),
            bridges: file.bridges.into_iter().map(|b| (b.id.clone(), b)).collect(),
            assets: file.assets,
        })
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn chain(&self, id: &ChainId) -> Result<&ChainConfig, RegistryError> {
        self.chains
            .get(id)
            .ok_or_else(|| RegistryError::ChainUnknown { chain: id.clone() })
    }

    pub fn bridge(&self, id: &BridgeId) -> Result<&BridgeConfig, RegistryError> {
        self.bridges
            .get(id)
            .ok_or_else(|| RegistryError::BridgeUnknown { bridge: id.clone() })
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values()
    }

    pub fn bridges(&self) -> impl Iterator<Item = &BridgeConfig> {
        self.bridges.values()
    }

    pub fn assets(&self) -> &[AssetEntry] {
        &self.assets
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().cloned().collect()
    }

    pub fn has_chain(&self, id: &ChainId) -> bool {
        self.chains.contains_key(id)
    }

    /// Bridges listing both chains and the asset, sorted by id for
    /// deterministic downstream tie-breaking.
    pub fn eligible_bridges(&self, a: &ChainId, b: &ChainId, asset: &AssetId) -> Vec<&BridgeConfig> {
        let mut out: Vec<&BridgeConfig> = self
            .bridges
            .values()
            .filter(|bridge| bridge.connects(a, b) && bridge.carries(asset))
            .collect();
        out.sort_by(|x, y| x.id.cmp(&y.id));
        out
    }
}
