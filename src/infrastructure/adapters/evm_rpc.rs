//! JSON-RPC chain adapter for EVM-style chains, with retrying HTTP
//! middleware. Only the read surface the engine needs is implemented;
//! submission goes through the same endpoint with raw payloads.

use crate::config::ChainConfig;
use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::opportunity::ExecutionStep;
use crate::domain::ports::{ChainAdapter, SignedTx, TxHash};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const RPC_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Chain adapter speaking `eth_*` JSON-RPC to the configured endpoint.
pub struct EvmRpcAdapter {
    chain: ChainId,
    endpoint: String,
    client: ClientWithMiddleware,
    request_id: AtomicU64,
}

impl EvmRpcAdapter {
    pub fn new(config: &ChainConfig) -> anyhow::Result<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(
            reqwest::Client::builder()
                .timeout(Duration::from_millis(RPC_TIMEOUT_MS))
                .build()?,
        )
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build();

        Ok(Self {
            chain: config.id.clone(),
            endpoint: config.rpc_endpoint.clone(),
            client,
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AdapterError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("EvmRpcAdapter[{}]: {method}", self.chain);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| match err {
                reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => {
                    AdapterError::RpcTimeout {
                        duration_ms: RPC_TIMEOUT_MS,
                    }
                }
                other => AdapterError::Transport {
                    reason: other.to_string(),
                },
            })?;

        let parsed: RpcResponse = response.json().await.map_err(|err| AdapterError::Transport {
            reason: format!("malformed RPC response: {err}"),
        })?;

        if let Some(error) = parsed.error {
            // Nonce and revert failures come back as RPC errors.
            let lowered = error.message.to_lowercase();
            if lowered.contains("nonce") {
                return Err(AdapterError::NonceConflict {
                    chain: self.chain.clone(),
                });
            }
            if lowered.contains("revert") {
                return Err(AdapterError::Reverted {
                    reason: error.message,
                });
            }
            return Err(AdapterError::Transport {
                reason: format!("RPC error {}: {}", error.code, error.message),
            });
        }

        parsed.result.ok_or_else(|| AdapterError::Transport {
            reason: "RPC response missing result".to_string(),
        })
    }

    fn parse_hex_u64(value: &serde_json::Value) -> Result<u64, AdapterError> {
        value
            .as_str()
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .ok_or_else(|| AdapterError::Transport {
                reason: format!("unparseable hex quantity: {value}"),
            })
    }

    fn parse_hex_u128(value: &serde_json::Value) -> Result<u128, AdapterError> {
        let raw = value.as_str().ok_or_else(|| AdapterError::Transport {
            reason: format!("unparseable hex quantity: {value}"),
        })?;
        let trimmed = raw.trim_start_matches("0x").trim_start_matches('0');
        if trimmed.is_empty() {
            return Ok(0);
        }
        u128::from_str_radix(trimmed, 16).map_err(|_| AdapterError::Transport {
            reason: format!("hex quantity out of range: {raw}"),
        })
    }
}

#[async_trait]
impl ChainAdapter for EvmRpcAdapter {
    fn chain(&self) -> ChainId {
        self.chain.clone()
    }

    async fn get_block_height(&self) -> Result<u64, AdapterError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        Self::parse_hex_u64(&result)
    }

    async fn get_balance(&self, asset: &AssetId, address: &str) -> Result<Decimal, AdapterError> {
        // Token balances go through eth_call (balanceOf) on the token
        // contract at the resolved address.
        let holder = address.trim_start_matches("0x");
        let result = self
            .call(
                "eth_call",
                json!([{"to": asset.as_str(), "data": format!("0x70a08231{holder:0>64}")}, "latest"]),
            )
            .await?;
        Ok(Decimal::from(Self::parse_hex_u128(&result)?))
    }

    async fn get_gas_price(&self) -> Result<Decimal, AdapterError> {
        let result = self.call("eth_gasPrice", json!([])).await?;
        Ok(Decimal::from(Self::parse_hex_u64(&result)?))
    }

    async fn estimate_gas(&self, step: &ExecutionStep) -> Result<Decimal, AdapterError> {
        let result = self
            .call(
                "eth_estimateGas",
                json!([{"to": step.contract, "data": "0x"}]),
            )
            .await;
        match result {
            Ok(value) => Ok(Decimal::from(Self::parse_hex_u64(&value)?)),
            // Estimation failures fall back to the step's static estimate.
            Err(_) => Ok(step.est_gas),
        }
    }

    async fn submit_transaction(&self, tx: SignedTx) -> Result<TxHash, AdapterError> {
        let result = self
            .call("eth_sendRawTransaction", json!([tx.raw]))
            .await?;
        result
            .as_str()
            .map(|s| TxHash(s.to_string()))
            .ok_or_else(|| AdapterError::Transport {
                reason: "submit returned no hash".to_string(),
            })
    }

    async fn wait_for_confirmation(&self, hash: &TxHash, depth: u32) -> Result<(), AdapterError> {
        for _ in 0..120 {
            let receipt = self
                .call("eth_getTransactionReceipt", json!([hash.0]))
                .await?;
            if let Some(block) = receipt.get("blockNumber") {
                let mined_at = Self::parse_hex_u64(block)?;
                let head = self.get_block_height().await?;
                if head >= mined_at + depth as u64 {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(1_000)).await;
        }
        Err(AdapterError::RpcTimeout {
            duration_ms: 120_000,
        })
    }
}
