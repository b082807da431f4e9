//! Adapter traits at the system boundary. The engine consumes chains, price
//! feeds, bridges and signers exclusively through these seams; integration
//! tests and simulation mode substitute in-process mocks.

use crate::domain::coordination::CoordinatedTransaction;
use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use crate::domain::market::PriceSample;
use crate::domain::opportunity::ExecutionStep;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc::Receiver;

/// A transaction payload prepared for signing. Raw keys never cross this
/// boundary; the signer service holds them.
#[derive(Debug, Clone, Serialize)]
pub struct UnsignedTx {
    pub chain: ChainId,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct SignedTx {
    pub chain: ChainId,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHash(pub String);

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain(&self) -> ChainId;

    async fn get_block_height(&self) -> Result<u64, AdapterError>;

    async fn get_balance(&self, asset: &AssetId, address: &str) -> Result<Decimal, AdapterError>;

    async fn get_gas_price(&self) -> Result<Decimal, AdapterError>;

    async fn estimate_gas(&self, step: &ExecutionStep) -> Result<Decimal, AdapterError>;

    async fn submit_transaction(&self, tx: SignedTx) -> Result<TxHash, AdapterError>;

    async fn wait_for_confirmation(&self, hash: &TxHash, depth: u32) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait PriceFeedAdapter: Send + Sync {
    /// Stream of samples; at-least-once, timestamp-ordered per key at the bus.
    async fn subscribe(&self) -> Result<Receiver<PriceSample>, AdapterError>;

    /// Explicit pull for one (asset, chain) pair.
    async fn refresh(&self, asset: &AssetId, chain: &ChainId) -> Result<PriceSample, AdapterError>;
}

/// Fee, latency and slippage estimate for moving `amount` over a bridge.
#[derive(Debug, Clone)]
pub struct BridgeQuote {
    pub fee_usd: Decimal,
    pub eta_s: u32,
    /// Expected slippage as a fraction.
    pub expected_slippage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOpStatus {
    Pending,
    Confirmed,
    Failed { reason: String },
}

/// Snapshot returned by a bridge health probe.
#[derive(Debug, Clone)]
pub struct BridgeHealthReport {
    pub is_operational: bool,
    pub current_tvl: Decimal,
    pub volume_7d: Decimal,
}

#[async_trait]
pub trait BridgeAdapter: Send + Sync {
    fn bridge(&self) -> BridgeId;

    async fn quote(
        &self,
        from_chain: &ChainId,
        to_chain: &ChainId,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<BridgeQuote, AdapterError>;

    async fn initiate(
        &self,
        from_chain: &ChainId,
        to_chain: &ChainId,
        asset: &AssetId,
        amount: Decimal,
    ) -> Result<String, AdapterError>;

    async fn status(&self, operation_id: &str) -> Result<BridgeOpStatus, AdapterError>;

    async fn health(&self) -> Result<BridgeHealthReport, AdapterError>;
}

#[async_trait]
pub trait SignerAdapter: Send + Sync {
    async fn sign(&self, chain: &ChainId, tx: UnsignedTx) -> Result<SignedTx, AdapterError>;
}

/// External multisig approval flow, consulted by the coordinator for
/// transactions at or above the configured value ceiling.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn request_approval(
        &self,
        tx: &CoordinatedTransaction,
        value_usd: Decimal,
    ) -> Result<bool, AdapterError>;
}

/// Append-only sink for audit records; implemented by the JSONL log.
pub trait AuditSink: Send + Sync {
    fn record(&self, category: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}
