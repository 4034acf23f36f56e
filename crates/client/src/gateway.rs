//! HTTP client for the anchor-network gateway: posting
//! bundle transactions and chunks, and polling transaction/block status.
//!
//! Every request retries with exponential backoff up to
//! `GATEWAY_HTTP_RETRIES` (default 8) times, matching the retry posture the
//! rest of the pipeline expects from its external collaborators.

use async_trait::async_trait;
use bf_capabilities::{Gateway, TxEnvelope, TxStatus};
use bf_types::{PipelineError, Result};
use bytes::Bytes;
use serde::Deserialize;
use std::time::Duration;

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            max_retries,
        }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries => {
                    let backoff = Duration::from_millis(200 * 2u64.pow(attempt.min(6)));
                    tracing::warn!(%operation, attempt, %error, ?backoff, "gateway request failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(PipelineError::Gateway(format!("{operation}: {error}"))),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxStatusResponse {
    number_of_confirmations: Option<u64>,
    block_height: Option<u64>,
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn post_bundle(&self, envelope: TxEnvelope) -> Result<()> {
        self.with_retries("post_bundle", || {
            let url = format!("{}/tx", self.base_url);
            let body = serde_json::json!({
                "id": envelope.id,
                "owner": envelope.owner,
                "last_tx": envelope.last_tx,
                "tags": envelope.tags,
                "data_root": envelope.data_root,
                "data_size": envelope.data_size.to_string(),
                "signature": envelope.signature,
                "reward": envelope.reward.to_string(),
            });
            let client = &self.client;
            async move { client.post(url).json(&body).send().await?.error_for_status().map(|_| ()) }
        })
        .await
    }

    async fn post_chunk(&self, tx_id: &str, data_offset: u64, chunk: Bytes) -> Result<()> {
        self.with_retries("post_chunk", || {
            let url = format!("{}/chunk", self.base_url);
            let body = serde_json::json!({
                "data_root": tx_id,
                "offset": data_offset.to_string(),
                "chunk": data_encoding::BASE64URL_NOPAD.encode(&chunk),
            });
            let client = &self.client;
            async move { client.post(url).json(&body).send().await?.error_for_status().map(|_| ()) }
        })
        .await
    }

    async fn get_tx_status(&self, tx_id: &str) -> Result<TxStatus> {
        self.with_retries("get_tx_status", || {
            let url = format!("{}/tx/{tx_id}/status", self.base_url);
            let client = &self.client;
            async move {
                let resp = client.get(url).send().await?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Ok(TxStatus::NotFound);
                }
                let parsed: TxStatusResponse = resp.error_for_status()?.json().await?;
                Ok(match (parsed.number_of_confirmations, parsed.block_height) {
                    (Some(confirmations), Some(block_height)) => TxStatus::Confirmed {
                        confirmations,
                        block_height,
                    },
                    _ => TxStatus::NotFound,
                })
            }
        })
        .await
    }

    async fn get_block_height(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct Resp {
            height: u64,
        }
        self.with_retries("get_block_height", || {
            let url = format!("{}/height", self.base_url);
            let client = &self.client;
            async move {
                let resp: Resp = client.get(url).send().await?.error_for_status()?.json().await?;
                Ok(resp.height)
            }
        })
        .await
    }

    async fn get_balance(&self, address: &str) -> Result<u64> {
        self.with_retries("get_balance", || {
            let url = format!("{}/wallet/{address}/balance", self.base_url);
            let client = &self.client;
            async move {
                let text = client.get(url).send().await?.error_for_status()?.text().await?;
                Ok(text.trim().parse::<u64>().unwrap_or(0))
            }
        })
        .await
    }
}
