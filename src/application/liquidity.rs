use crate::config::SharedConfig;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use crate::domain::portfolio::{AssetPosition, PortfolioView};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// One value movement between chains, in USD at current valuation.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceMove {
    pub asset: AssetId,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub amount_usd: Decimal,
}

/// Target distribution with the ordered moves that reach it.
#[derive(Debug, Clone)]
pub struct RebalancePlan {
    pub id: Uuid,
    /// Constraint-adjusted target the moves steer toward.
    pub target: HashMap<ChainId, Decimal>,
    /// Largest imbalance first.
    pub moves: Vec<RebalanceMove>,
    pub projected_efficiency: f64,
    pub created_at: i64,
}

impl RebalancePlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn total_moved(&self) -> Decimal {
        self.moves.iter().map(|m| m.amount_usd).sum()
    }
}

/// Multi-asset reallocation with bridge capacity accounting.
#[derive(Debug, Clone)]
pub struct MultiAssetPlan {
    pub assignments: Vec<(RebalanceMove, BridgeId)>,
    /// Moves that could not be routed within per-bridge capacity.
    pub unrouted: Vec<RebalanceMove>,
}

/// Side output: the same corridor is quoted at materially different cost by
/// two bridges.
#[derive(Debug, Clone)]
pub struct CrossBridgeOpportunity {
    pub asset: AssetId,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub cheap_bridge: BridgeId,
    pub expensive_bridge: BridgeId,
    pub fee_delta_usd: Decimal,
}

/// Market events the optimizer adapts to in real time.
#[derive(Debug, Clone)]
pub enum MarketShock {
    GasSpike { chain: ChainId },
    BridgeCongestion { bridge: BridgeId },
    YieldOpportunity { chain: ChainId, apy: Decimal },
}

/// Produces target distributions and the ordered move set that reaches
/// them, honoring concentration, liquidity-fraction and utilization
/// constraints.
pub struct LiquidityOptimizer {
    config: SharedConfig,
}

impl LiquidityOptimizer {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    /// Clamp a requested target to the concentration ceiling and
    /// renormalize so fractions still sum to one.
    pub fn constrained_target(
        &self,
        requested: &HashMap<ChainId, Decimal>,
    ) -> HashMap<ChainId, Decimal> {
        let config = self.config.current();
        let cap = config.liquidity.max_chain_concentration;

        let mut target: HashMap<ChainId, Decimal> = requested
            .iter()
            .map(|(c, f)| (c.clone(), (*f).min(cap)))
            .collect();
        let sum: Decimal = target.values().copied().sum();
        if sum > Decimal::ZERO && sum != Decimal::ONE {
            // Spread the clipped weight over chains below the ceiling,
            // proportionally to their remaining headroom.
            let deficit = Decimal::ONE - sum;
            let headroom: Decimal = target.values().map(|f| cap - *f).sum();
            if headroom > Decimal::ZERO {
                for frac in target.values_mut() {
                    *frac += deficit * (cap - *frac) / headroom;
                }
            }
        }
        target
    }

    /// Build the ordered move set steering the portfolio to target.
    ///
    /// Moves drain surplus chains into deficit chains, largest imbalance
    /// first, and never drain more than `max_utilization` of a chain's
    /// value, keeping a liquid remainder per asset.
    pub fn plan_rebalance(
        &self,
        positions: &[AssetPosition],
        requested_target: Option<&HashMap<ChainId, Decimal>>,
        now_ms: i64,
    ) -> RebalancePlan {
        let config = self.config.current();
        let default_target = config.liquidity.target_distribution.clone();
        let requested = requested_target.unwrap_or(&default_target);
        let target = self.constrained_target(requested);

        let total: Decimal = positions.iter().map(|p| p.value_usd).sum();
        let mut plan = RebalancePlan {
            id: Uuid::new_v4(),
            target: target.clone(),
            moves: Vec::new(),
            projected_efficiency: 100.0,
            created_at: now_ms,
        };
        if total <= Decimal::ZERO || target.is_empty() {
            return plan;
        }

        let mut per_chain: HashMap<ChainId, Decimal> = HashMap::new();
        for p in positions {
            *per_chain.entry(p.chain.clone()).or_default() += p.value_usd;
        }

        // Signed imbalance per chain: positive = surplus to shed.
        let mut chains: Vec<ChainId> = per_chain
            .keys()
            .chain(target.keys())
            .cloned()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        chains.sort();

        // Imbalances below 0.1% of book value are noise, not moves.
        let epsilon = total * Decimal::new(1, 3);
        let mut surplus: Vec<(ChainId, Decimal)> = Vec::new();
        let mut deficit: Vec<(ChainId, Decimal)> = Vec::new();
        for chain in &chains {
            let actual = per_chain.get(chain).copied().unwrap_or(Decimal::ZERO);
            let wanted = target.get(chain).copied().unwrap_or(Decimal::ZERO) * total;
            let delta = actual - wanted;
            if delta > epsilon {
                // Never drain a chain past its utilization ceiling.
                let drainable = actual * config.liquidity.max_utilization;
                surplus.push((chain.clone(), delta.min(drainable)));
            } else if -delta > epsilon {
                deficit.push((chain.clone(), -delta));
            }
        }
        surplus.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        deficit.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        // Greedy matching, choosing which asset to move from each surplus
        // chain by unlocked value while keeping the liquid remainder.
        for (from_chain, mut excess) in surplus {
            for (to_chain, need) in deficit.iter_mut() {
                if excess <= Decimal::ZERO || *need <= Decimal::ZERO {
                    continue;
                }
                let amount = excess.min(*need);
                let sized = self.assign_assets(positions, &from_chain, to_chain, amount, &config);
                for mv in sized {
                    excess -= mv.amount_usd;
                    *need -= mv.amount_usd;
                    plan.moves.push(mv);
                }
            }
        }

        plan.projected_efficiency = Self::project_efficiency(positions, &plan, &target);
        debug!(
            "LiquidityOptimizer: planned {} moves, ${} total, projected efficiency {:.1}",
            plan.moves.len(),
            plan.total_moved(),
            plan.projected_efficiency
        );
        plan
    }

    /// Pick concrete (asset, amount) slices realizing a chain-level move.
    fn assign_assets(
        &self,
        positions: &[AssetPosition],
        from_chain: &ChainId,
        to_chain: &ChainId,
        amount: Decimal,
        config: &crate::config::Config,
    ) -> Vec<RebalanceMove> {
        let mut sources: Vec<&AssetPosition> = positions
            .iter()
            .filter(|p| &p.chain == from_chain && !p.is_locked && p.value_usd > Decimal::ZERO)
            .collect();
        sources.sort_by(|a, b| b.value_usd.cmp(&a.value_usd).then_with(|| a.asset.cmp(&b.asset)));

        let mut remaining = amount;
        let mut moves = Vec::new();
        for position in sources {
            if remaining <= Decimal::ZERO {
                break;
            }
            // Keep the configured liquid fraction of every asset in place.
            let movable =
                position.value_usd * (Decimal::ONE - config.liquidity.min_asset_liquidity_fraction);
            let slice = movable.min(remaining);
            if slice <= Decimal::ZERO {
                continue;
            }
            moves.push(RebalanceMove {
                asset: position.asset.clone(),
                from_chain: from_chain.clone(),
                to_chain: to_chain.clone(),
                amount_usd: slice,
            });
            remaining -= slice;
        }
        moves
    }

    fn project_efficiency(
        positions: &[AssetPosition],
        plan: &RebalancePlan,
        target: &HashMap<ChainId, Decimal>,
    ) -> f64 {
        let mut projected: Vec<AssetPosition> = positions.to_vec();
        for mv in &plan.moves {
            for p in projected.iter_mut() {
                if p.chain == mv.from_chain && p.asset == mv.asset {
                    p.value_usd -= mv.amount_usd;
                }
            }
            if let Some(existing) = projected
                .iter_mut()
                .find(|p| p.chain == mv.to_chain && p.asset == mv.asset)
            {
                existing.value_usd += mv.amount_usd;
            } else {
                projected.push(AssetPosition::new(
                    mv.to_chain.clone(),
                    mv.asset.clone(),
                    Decimal::ZERO,
                    mv.amount_usd,
                    plan.created_at,
                ));
            }
        }
        PortfolioView::compute(projected, target.clone(), Decimal::ONE, plan.created_at).efficiency
    }

    /// Route multi-asset moves over bridges with per-bridge capacity
    /// limits, cheapest eligible bridge first. Also surfaces cross-bridge
    /// fee dislocations on used corridors.
    pub fn optimize_multi_asset(
        &self,
        moves: &[RebalanceMove],
        bridge_capacity_usd: &HashMap<BridgeId, Decimal>,
    ) -> (MultiAssetPlan, Vec<CrossBridgeOpportunity>) {
        let config = self.config.current();
        let mut remaining = bridge_capacity_usd.clone();
        let mut plan = MultiAssetPlan {
            assignments: Vec::new(),
            unrouted: Vec::new(),
        };
        let mut cross_bridge = Vec::new();

        for mv in moves {
            let eligible =
                config
                    .registry
                    .eligible_bridges(&mv.from_chain, &mv.to_chain, &mv.asset);
            let mut ranked: Vec<_> = eligible
                .iter()
                .map(|b| (b.id.clone(), b.fee_for(mv.amount_usd)))
                .collect();
            ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

            if ranked.len() >= 2 {
                let delta = ranked[1].1 - ranked[0].1;
                if delta > Decimal::ZERO {
                    cross_bridge.push(CrossBridgeOpportunity {
                        asset: mv.asset.clone(),
                        from_chain: mv.from_chain.clone(),
                        to_chain: mv.to_chain.clone(),
                        cheap_bridge: ranked[0].0.clone(),
                        expensive_bridge: ranked[1].0.clone(),
                        fee_delta_usd: delta,
                    });
                }
            }

            let assigned = ranked.iter().find(|(bridge, _)| {
                remaining
                    .get(bridge)
                    .map(|cap| *cap >= mv.amount_usd)
                    .unwrap_or(true)
            });
            match assigned {
                Some((bridge, _)) => {
                    if let Some(cap) = remaining.get_mut(bridge) {
                        *cap -= mv.amount_usd;
                    }
                    plan.assignments.push((mv.clone(), bridge.clone()));
                }
                None => plan.unrouted.push(mv.clone()),
            }
        }

        (plan, cross_bridge)
    }

    /// React to a market shock by reshaping an existing plan. The adjusted
    /// plan must preserve at least 90% of the original's projected
    /// efficiency; otherwise the original is kept and the shock only logged.
    pub fn adapt_to_shock(
        &self,
        positions: &[AssetPosition],
        plan: &RebalancePlan,
        shock: &MarketShock,
    ) -> RebalancePlan {
        let mut adjusted = plan.clone();
        adjusted.id = Uuid::new_v4();

        match shock {
            MarketShock::GasSpike { chain } => {
                // Defer movements touching the expensive chain.
                adjusted.moves.retain(|m| &m.from_chain != chain && &m.to_chain != chain);
                info!(
                    "LiquidityOptimizer: gas spike on {chain}, deferring {} moves",
                    plan.moves.len() - adjusted.moves.len()
                );
            }
            MarketShock::BridgeCongestion { bridge } => {
                // Bridge choice happens at routing time; shrink move sizes so
                // the congested corridor clears faster.
                info!("LiquidityOptimizer: congestion on {bridge}, halving move sizes");
                for mv in adjusted.moves.iter_mut() {
                    mv.amount_usd *= Decimal::new(5, 1);
                }
            }
            MarketShock::YieldOpportunity { chain, apy } => {
                let config = self.config.current();
                let tilt = (*apy * Decimal::new(2, 0)).min(Decimal::new(5, 2));
                let mut target = adjusted.target.clone();
                let entry = target.entry(chain.clone()).or_insert(Decimal::ZERO);
                *entry = (*entry + tilt).min(config.liquidity.max_chain_concentration);
                let rescale: Decimal = target.values().copied().sum();
                if rescale > Decimal::ZERO {
                    for frac in target.values_mut() {
                        *frac /= rescale;
                    }
                }
                info!(
                    "LiquidityOptimizer: yield opportunity on {chain} (apy {apy}), tilting target"
                );
                return self.plan_rebalance(positions, Some(&target), plan.created_at);
            }
        }

        adjusted.projected_efficiency =
            Self::project_efficiency(positions, &adjusted, &adjusted.target);
        if adjusted.projected_efficiency < plan.projected_efficiency * 0.9 {
            info!(
                "LiquidityOptimizer: adaptation would cost too much efficiency ({:.1} < 90% of {:.1}), keeping original plan",
                adjusted.projected_efficiency, plan.projected_efficiency
            );
            return plan.clone();
        }
        adjusted
    }

    /// Capital utilization of the current book: fraction of value on chains
    /// carrying a target weight.
    pub fn utilization(&self, positions: &[AssetPosition]) -> Decimal {
        let config = self.config.current();
        let total: Decimal = positions.iter().map(|p| p.value_usd).sum();
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let deployed: Decimal = positions
            .iter()
            .filter(|p| {
                config
                    .liquidity
                    .target_distribution
                    .get(&p.chain)
                    .map(|f| *f > Decimal::ZERO)
                    .unwrap_or(false)
            })
            .map(|p| p.value_usd)
            .sum();
        deployed / total
    }
}
