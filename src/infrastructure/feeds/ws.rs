//! Streaming price feed over WebSocket. The upstream sends JSON ticks;
//! each valid tick becomes a `PriceSample`. The reader reconnects with
//! backoff and the subscriber channel survives reconnects.

use crate::domain::errors::AdapterError;
use crate::domain::identifiers::{AssetId, ChainId};
use crate::domain::market::PriceSample;
use crate::domain::ports::PriceFeedAdapter;
use async_trait::async_trait;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// One tick as the upstream emits it.
#[derive(Debug, Deserialize)]
struct WireTick {
    asset: String,
    chain: String,
    price_usd: Decimal,
    liquidity_usd: Decimal,
    ts: i64,
    #[serde(default)]
    source: Option<String>,
}

impl WireTick {
    fn into_sample(self, default_source: &str) -> PriceSample {
        PriceSample {
            asset: AssetId::new(self.asset),
            chain: ChainId::new(self.chain),
            price_usd: self.price_usd,
            liquidity_usd: self.liquidity_usd,
            timestamp: self.ts,
            source: self.source.unwrap_or_else(|| default_source.to_string()),
        }
    }
}

/// WebSocket price feed adapter. `subscribe` spawns the reader task; the
/// returned receiver yields samples across reconnects until the adapter is
/// dropped.
pub struct WsPriceFeed {
    url: Url,
    source_name: String,
    latest: std::sync::Arc<Mutex<HashMap<(AssetId, ChainId), PriceSample>>>,
}

impl WsPriceFeed {
    pub fn new(url: Url, source_name: impl Into<String>) -> Self {
        Self {
            url,
            source_name: source_name.into(),
            latest: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn reader_loop(
        url: Url,
        source_name: String,
        latest: std::sync::Arc<Mutex<HashMap<(AssetId, ChainId), PriceSample>>>,
        tx: mpsc::Sender<PriceSample>,
    ) {
        let mut delay_ms = RECONNECT_BASE_DELAY_MS;
        loop {
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!("WsPriceFeed: connected to {url}");
                    delay_ms = RECONNECT_BASE_DELAY_MS;
                    let (_, mut read) = stream.split();
                    while let Some(message) = read.next().await {
                        let text = match message {
                            Ok(Message::Text(text)) => text,
                            Ok(Message::Close(_)) => break,
                            Ok(_) => continue,
                            Err(err) => {
                                warn!("WsPriceFeed: read error: {err}");
                                break;
                            }
                        };
                        match serde_json::from_str::<WireTick>(&text) {
                            Ok(tick) => {
                                let sample = tick.into_sample(&source_name);
                                latest
                                    .lock()
                                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                                    .insert(sample.key(), sample.clone());
                                if tx.send(sample).await.is_err() {
                                    // Subscriber gone; stop reading.
                                    return;
                                }
                            }
                            Err(err) => warn!("WsPriceFeed: skipping malformed tick: {err}"),
                        }
                    }
                    warn!("WsPriceFeed: stream ended, reconnecting");
                }
                Err(err) => {
                    warn!("WsPriceFeed: connect failed ({err}), retrying in {delay_ms}ms");
                }
            }
            if tx.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(RECONNECT_MAX_DELAY_MS);
        }
    }
}

#[async_trait]
impl PriceFeedAdapter for WsPriceFeed {
    async fn subscribe(&self) -> Result<mpsc::Receiver<PriceSample>, AdapterError> {
        let (tx, rx) = mpsc::channel(1_024);
        tokio::spawn(Self::reader_loop(
            self.url.clone(),
            self.source_name.clone(),
            self.latest.clone(),
            tx,
        ));
        Ok(rx)
    }

    async fn refresh(&self, asset: &AssetId, chain: &ChainId) -> Result<PriceSample, AdapterError> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(asset.clone(), chain.clone()))
            .cloned()
            .ok_or(AdapterError::Transport {
                reason: format!("no cached sample for {asset}@{chain}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tick_parsing() {
        let tick: WireTick = serde_json::from_str(
            r#"{"asset":"USDC","chain":"polygon","price_usd":"0.9991","liquidity_usd":"1500000","ts":1700000000000}"#,
        )
        .unwrap();
        let sample = tick.into_sample("ws");
        assert_eq!(sample.asset, AssetId::new("USDC"));
        assert_eq!(sample.source, "ws");
        assert_eq!(sample.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_malformed_tick_is_rejected() {
        assert!(serde_json::from_str::<WireTick>(r#"{"asset":"USDC"}"#).is_err());
    }
}
