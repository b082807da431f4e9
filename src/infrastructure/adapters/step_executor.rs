//! Live step execution over the chain, bridge and signer ports.

use crate::application::planner::{PlannedStep, StepExecutor};
use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{BridgeId, ChainId};
use crate::domain::opportunity::StepKind;
use crate::domain::ports::{BridgeAdapter, BridgeOpStatus, ChainAdapter, SignerAdapter, UnsignedTx};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long to poll a bridge operation before treating it as timed out.
const BRIDGE_POLL_INTERVAL_MS: u64 = 500;
const BRIDGE_POLL_ATTEMPTS: u32 = 600;

/// Dispatches planned steps to the real adapters: on-chain steps are
/// signed and submitted through the signer and chain adapters, bridge
/// steps run through the bridge adapter's initiate/status flow.
pub struct AdapterStepExecutor {
    chains: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    bridges: HashMap<BridgeId, Arc<dyn BridgeAdapter>>,
    signer: Arc<dyn SignerAdapter>,
    confirmation_depth: u32,
}

impl AdapterStepExecutor {
    pub fn new(
        chains: Vec<Arc<dyn ChainAdapter>>,
        bridges: Vec<Arc<dyn BridgeAdapter>>,
        signer: Arc<dyn SignerAdapter>,
        confirmation_depth: u32,
    ) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain(), c)).collect(),
            bridges: bridges.into_iter().map(|b| (b.bridge(), b)).collect(),
            signer,
            confirmation_depth,
        }
    }

    async fn execute_onchain(&self, step: &PlannedStep) -> Result<(), AdapterError> {
        let chain = self
            .chains
            .get(&step.chain)
            .ok_or_else(|| AdapterError::Transport {
                reason: format!("no adapter for chain {}", step.chain),
            })?;

        let payload = serde_json::json!({
            "kind": format!("{:?}", step.kind),
            "asset": step.asset,
            "amount_usd": step.amount_usd.to_string(),
            "mev": step.mev.map(|m| format!("{m:?}")),
        })
        .to_string();

        let signed = self
            .signer
            .sign(
                &step.chain,
                UnsignedTx {
                    chain: step.chain.clone(),
                    payload,
                },
            )
            .await?;
        let hash = chain.submit_transaction(signed).await?;
        chain
            .wait_for_confirmation(&hash, self.confirmation_depth)
            .await?;
        debug!("AdapterStepExecutor: step {:?} confirmed as {:?}", step.id, hash);
        Ok(())
    }

    async fn execute_bridge(&self, step: &PlannedStep) -> Result<(), AdapterError> {
        let bridge_id = step.bridge.as_ref().ok_or_else(|| AdapterError::Transport {
            reason: "bridge step without bridge id".to_string(),
        })?;
        let to_chain = step.to_chain.as_ref().ok_or_else(|| AdapterError::Transport {
            reason: "bridge step without destination".to_string(),
        })?;
        let bridge = self
            .bridges
            .get(bridge_id)
            .ok_or_else(|| AdapterError::BridgeOutage {
                bridge: bridge_id.clone(),
            })?;

        let operation = bridge
            .initiate(&step.chain, to_chain, &step.asset, step.amount_usd)
            .await?;

        for _ in 0..BRIDGE_POLL_ATTEMPTS {
            match bridge.status(&operation).await? {
                BridgeOpStatus::Confirmed => return Ok(()),
                BridgeOpStatus::Failed { reason } => {
                    return Err(AdapterError::Reverted { reason });
                }
                BridgeOpStatus::Pending => {
                    tokio::time::sleep(Duration::from_millis(BRIDGE_POLL_INTERVAL_MS)).await;
                }
            }
        }
        Err(AdapterError::RpcTimeout {
            duration_ms: BRIDGE_POLL_INTERVAL_MS * BRIDGE_POLL_ATTEMPTS as u64,
        })
    }
}

#[async_trait]
impl StepExecutor for AdapterStepExecutor {
    async fn execute_step(&self, step: &PlannedStep) -> Result<(), AdapterError> {
        match step.kind {
            StepKind::Bridge => self.execute_bridge(step).await,
            StepKind::Swap | StepKind::Deposit | StepKind::Withdraw => {
                self.execute_onchain(step).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::mock::{
        MockBridgeAdapter, MockChainAdapter, MockSignerAdapter,
    };
    use crate::domain::identifiers::AssetId;
    use crate::domain::opportunity::StepId;
    use rust_decimal_macros::dec;

    fn executor() -> AdapterStepExecutor {
        AdapterStepExecutor::new(
            vec![
                Arc::new(MockChainAdapter::new(ChainId::new("ethereum"))),
                Arc::new(MockChainAdapter::new(ChainId::new("polygon"))),
            ],
            vec![Arc::new(MockBridgeAdapter::new(
                BridgeId::new("stargate"),
                dec!(5),
                dec!(0.0006),
            ))],
            Arc::new(MockSignerAdapter),
            1,
        )
    }

    fn step(kind: StepKind, bridge: Option<&str>) -> PlannedStep {
        PlannedStep {
            id: StepId(0),
            kind,
            chain: ChainId::new("ethereum"),
            asset: AssetId::new("USDC"),
            bridge: bridge.map(BridgeId::new),
            to_chain: Some(ChainId::new("polygon")),
            amount_usd: dec!(10_000),
            dependencies: vec![],
            mev: None,
            reversible: true,
        }
    }

    #[tokio::test]
    async fn test_onchain_step_signs_and_confirms() {
        let executor = executor();
        executor
            .execute_step(&step(StepKind::Withdraw, None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bridge_step_settles() {
        let executor = executor();
        executor
            .execute_step(&step(StepKind::Bridge, Some("stargate")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_bridge_is_an_outage() {
        let executor = executor();
        let err = executor
            .execute_step(&step(StepKind::Bridge, Some("hop")))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::BridgeOutage { .. }));
    }
}
