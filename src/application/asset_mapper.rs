use crate::config::{AssetEntry, Registry};
use crate::domain::identifiers::{AssetId, ChainId};
use std::collections::HashMap;

/// Canonical asset identity across chains.
///
/// Maps per-chain token addresses back to the logical asset and resolves a
/// logical asset to its deployment on a given chain. Lookups are O(1);
/// unknown mappings return `None` rather than failing.
pub struct AssetMapper {
    /// (chain, lowercased address) -> canonical asset
    by_address: HashMap<(ChainId, String), AssetId>,
    /// (asset, chain) -> (address, decimals)
    by_asset: HashMap<(AssetId, ChainId), (String, u32)>,
    /// lowercased alias -> canonical asset
    aliases: HashMap<String, AssetId>,
    /// all canonical ids, sorted for deterministic search output
    all: Vec<AssetId>,
}

impl AssetMapper {
    pub fn new(registry: &Registry) -> Self {
        let mut mapper = Self {
            by_address: HashMap::new(),
            by_asset: HashMap::new(),
            aliases: HashMap::new(),
            all: Vec::new(),
        };
        for entry in registry.assets() {
            mapper.insert(entry);
        }
        mapper.all.sort();
        mapper
    }

    fn insert(&mut self, entry: &AssetEntry) {
        self.all.push(entry.id.clone());
        self.aliases
            .insert(entry.id.as_str().to_lowercase(), entry.id.clone());
        for alias in &entry.aliases {
            self.aliases.insert(alias.to_lowercase(), entry.id.clone());
        }
        for token in &entry.tokens {
            self.by_address.insert(
                (token.chain.clone(), token.address.to_lowercase()),
                entry.id.clone(),
            );
            self.by_asset.insert(
                (entry.id.clone(), token.chain.clone()),
                (token.address.clone(), token.decimals),
            );
        }
    }

    /// Canonical asset for a per-chain token address.
    pub fn canonicalize(&self, chain: &ChainId, address: &str) -> Option<AssetId> {
        self.by_address
            .get(&(chain.clone(), address.to_lowercase()))
            .cloned()
    }

    /// Token address and decimals of an asset on a chain.
    pub fn resolve(&self, asset: &AssetId, chain: &ChainId) -> Option<(String, u32)> {
        self.by_asset.get(&(asset.clone(), chain.clone())).cloned()
    }

    /// Chains an asset is deployed on.
    pub fn chains_for(&self, asset: &AssetId) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self
            .by_asset
            .keys()
            .filter(|(a, _)| a == asset)
            .map(|(_, c)| c.clone())
            .collect();
        chains.sort();
        chains
    }

    /// Substring and alias search, case-insensitive, deterministic order.
    pub fn search(&self, query: &str) -> Vec<AssetId> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<AssetId> = self
            .all
            .iter()
            .filter(|id| id.as_str().to_lowercase().contains(&needle))
            .cloned()
            .collect();
        for (alias, id) in &self.aliases {
            if alias.contains(&needle) && !hits.contains(id) {
                hits.push(id.clone());
            }
        }
        hits.sort();
        hits.dedup();
        hits
    }

    pub fn known_assets(&self) -> &[AssetId] {
        &self.all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Registry;

    fn mapper() -> AssetMapper {
        let registry = Registry::from_toml_str(
            r#"
[[assets]]
id = "USDC"
aliases = ["usd-coin", "usdc.e"]

[[assets.tokens]]
chain = "ethereum"
address = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
decimals = 6

[[assets.tokens]]
chain = "polygon"
address = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174"
decimals = 6

[[assets]]
id = "WETH"

[[assets.tokens]]
chain = "ethereum"
address = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
decimals = 18
"#,
        )
        .unwrap();
        AssetMapper::new(&registry)
    }

    #[test]
    fn test_canonicalize_is_case_insensitive() {
        let m = mapper();
        let asset = m.canonicalize(
            &ChainId::new("ethereum"),
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        );
        assert_eq!(asset, Some(AssetId::new("USDC")));
    }

    #[test]
    fn test_resolve_returns_address_and_decimals() {
        let m = mapper();
        let (address, decimals) = m
            .resolve(&AssetId::new("USDC"), &ChainId::new("polygon"))
            .unwrap();
        assert!(address.starts_with("0x2791"));
        assert_eq!(decimals, 6);
    }

    #[test]
    fn test_unknown_returns_none() {
        let m = mapper();
        assert!(m.canonicalize(&ChainId::new("ethereum"), "0xdead").is_none());
        assert!(m.resolve(&AssetId::new("DAI"), &ChainId::new("ethereum")).is_none());
        assert!(m.resolve(&AssetId::new("WETH"), &ChainId::new("polygon")).is_none());
    }

    #[test]
    fn test_search_matches_substring_and_alias() {
        let m = mapper();
        assert_eq!(m.search("usd"), vec![AssetId::new("USDC")]);
        assert_eq!(m.search("usd-coin"), vec![AssetId::new("USDC")]);
        assert_eq!(m.search("eth"), vec![AssetId::new("WETH")]);
        assert!(m.search("").is_empty());
        assert!(m.search("xyz").is_empty());
    }

    #[test]
    fn test_chains_for_asset() {
        let m = mapper();
        let chains = m.chains_for(&AssetId::new("USDC"));
        assert_eq!(chains, vec![ChainId::new("ethereum"), ChainId::new("polygon")]);
    }
}
