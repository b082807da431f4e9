//! In-process adapters for simulation mode and integration tests. They
//! honor the same ports as the live adapters, with scriptable failures.

use crate::domain::coordination::CoordinatedTransaction;
use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{AssetId, BridgeId, ChainId};
use crate::domain::market::PriceSample;
use crate::domain::opportunity::ExecutionStep;
use crate::domain::ports::{
    ApprovalService, BridgeAdapter, BridgeHealthReport, BridgeOpStatus, BridgeQuote, ChainAdapter,
    PriceFeedAdapter, SignedTx, TxHash, UnsignedTx,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Chain adapter over an in-memory ledger.
pub struct MockChainAdapter {
    chain: ChainId,
    height: AtomicU64,
    gas_price: Mutex<Decimal>,
    balances: Mutex<HashMap<(AssetId, String), Decimal>>,
    fail_rpc: AtomicBool,
    /// Artificial latency per call, for sync timing tests.
    latency_ms: u64,
}

impl MockChainAdapter {
    pub fn new(chain: ChainId) -> Self {
        Self {
            chain,
            height: AtomicU64::new(1),
            gas_price: Mutex::new(Decimal::from(30)),
            balances: Mutex::new(HashMap::new()),
            fail_rpc: AtomicBool::new(false),
            latency_ms: 0,
        }
    }

    pub fn with_latency(chain: ChainId, latency_ms: u64) -> Self {
        Self {
            latency_ms,
            ..Self::new(chain)
        }
    }

    pub fn set_balance(&self, asset: AssetId, address: &str, amount: Decimal) {
        self.balances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((asset, address.to_string()), amount);
    }

    pub fn advance_block(&self) -> u64 {
        self.height.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_rpc.store(failing, Ordering::Relaxed);
    }

    async fn check_up(&self) -> Result<(), AdapterError> {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        if self.fail_rpc.load(Ordering::Relaxed) {
            return Err(AdapterError::RpcTimeout { duration_ms: 5_000 });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> ChainId {
        self.chain.clone()
    }

    async fn get_block_height(&self) -> Result<u64, AdapterError> {
        self.check_up().await?;
        Ok(self.height.load(Ordering::Relaxed))
    }

    async fn get_balance(&self, asset: &AssetId, address: &str) -> Result<Decimal, AdapterError> {
        self.check_up().await?;
        Ok(self
            .balances
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(asset.clone(), address.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_gas_price(&self) -> Result<Decimal, AdapterError> {
        self.check_up().await?;
        Ok(*self
            .gas_price
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    async fn estimate_gas(&self, step: &ExecutionStep) -> Result<Decimal, AdapterError> {
        self.check_up().await?;
        Ok(step.est_gas)
    }

    async fn submit_transaction(&self, tx: SignedTx) -> Result<TxHash, AdapterError> {
        self.check_up().await?;
        Ok(TxHash(format!("0x{:016x}", fxhash(&tx.raw))))
    }

    async fn wait_for_confirmation(&self, _hash: &TxHash, _depth: u32) -> Result<(), AdapterError> {
        self.check_up().await
    }
}

fn fxhash(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325u64, |acc, b| {
        (acc ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

/// Bridge adapter with configurable fee and instant settlement.
pub struct MockBridgeAdapter {
    bridge: BridgeId,
    fee_base: Decimal,
    fee_variable_pct: Decimal,
    operational: AtomicBool,
    operations: Mutex<HashMap<String, BridgeOpStatus>>,
    next_op: AtomicU64,
}

impl MockBridgeAdapter {
    pub fn new(bridge: BridgeId, fee_base: Decimal, fee_variable_pct: Decimal) -> Self {
        Self {
            bridge,
            fee_base,
            fee_variable_pct,
            operational: AtomicBool::new(true),
            operations: Mutex::new(HashMap::new()),
            next_op: AtomicU64::new(1),
        }
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Relaxed);
    }
}

#[async_trait]
impl BridgeAdapter for MockBridgeAdapter {
    fn bridge(&self) -> BridgeId {
        self.bridge.clone()
    }

    async fn quote(
        &self,
        _from_chain: &ChainId,
        _to_chain: &ChainId,
        _asset: &AssetId,
        amount: Decimal,
    ) -> Result<BridgeQuote, AdapterError> {
        if !self.operational.load(Ordering::Relaxed) {
            return Err(AdapterError::BridgeOutage {
                bridge: self.bridge.clone(),
            });
        }
        Ok(BridgeQuote {
            fee_usd: self.fee_base + amount * self.fee_variable_pct,
            eta_s: 120,
            expected_slippage: Decimal::new(1, 3),
        })
    }

    async fn initiate(
        &self,
        _from_chain: &ChainId,
        _to_chain: &ChainId,
        _asset: &AssetId,
        _amount: Decimal,
    ) -> Result<String, AdapterError> {
        if !self.operational.load(Ordering::Relaxed) {
            return Err(AdapterError::BridgeOutage {
                bridge: self.bridge.clone(),
            });
        }
        let id = format!(
            "{}-{}",
            self.bridge,
            self.next_op.fetch_add(1, Ordering::Relaxed)
        );
        self.operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), BridgeOpStatus::Confirmed);
        Ok(id)
    }

    async fn status(&self, operation_id: &str) -> Result<BridgeOpStatus, AdapterError> {
        Ok(self
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(operation_id)
            .cloned()
            .unwrap_or(BridgeOpStatus::Failed {
                reason: "unknown operation".to_string(),
            }))
    }

    async fn health(&self) -> Result<BridgeHealthReport, AdapterError> {
        Ok(BridgeHealthReport {
            is_operational: self.operational.load(Ordering::Relaxed),
            current_tvl: Decimal::from(100_000_000),
            volume_7d: Decimal::from(50_000_000),
        })
    }
}

/// Signer that never sees raw keys; it wraps the payload.
pub struct MockSignerAdapter;

#[async_trait]
impl crate::domain::ports::SignerAdapter for MockSignerAdapter {
    async fn sign(&self, chain: &ChainId, tx: UnsignedTx) -> Result<SignedTx, AdapterError> {
        Ok(SignedTx {
            chain: chain.clone(),
            raw: format!("signed:{}", tx.payload),
        })
    }
}

/// Price feed fed by hand (tests) or by a generator task (simulation).
pub struct MockPriceFeed {
    tx: mpsc::Sender<PriceSample>,
    rx: Mutex<Option<mpsc::Receiver<PriceSample>>>,
    latest: Mutex<HashMap<(AssetId, ChainId), PriceSample>>,
}

impl MockPriceFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Push one sample into the stream.
    pub async fn push(&self, sample: PriceSample) {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(sample.key(), sample.clone());
        let _ = self.tx.send(sample).await;
    }
}

#[async_trait]
impl PriceFeedAdapter for MockPriceFeed {
    async fn subscribe(&self) -> Result<mpsc::Receiver<PriceSample>, AdapterError> {
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(AdapterError::Transport {
                reason: "feed already subscribed".to_string(),
            })
    }

    async fn refresh(&self, asset: &AssetId, chain: &ChainId) -> Result<PriceSample, AdapterError> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(asset.clone(), chain.clone()))
            .cloned()
            .ok_or(AdapterError::Transport {
                reason: format!("no sample for {asset}@{chain}"),
            })
    }
}

/// Approval service that always approves (or always denies).
pub struct FixedApprovalService {
    approve: bool,
}

impl FixedApprovalService {
    pub fn approving() -> Self {
        Self { approve: true }
    }

    pub fn denying() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalService for FixedApprovalService {
    async fn request_approval(
        &self,
        _tx: &CoordinatedTransaction,
        _value_usd: Decimal,
    ) -> Result<bool, AdapterError> {
        Ok(self.approve)
    }
}
