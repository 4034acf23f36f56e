//! Shared fakes for the job-body integration tests: a fixed-reward pricing
//! service, a no-op signing wallet, and a scriptable gateway.
#![cfg(test)]
#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bf_capabilities::{BundleReward, Gateway, PricingService, TxEnvelope, TxStatus, Wallet};
use bf_types::{DataItemId, Result};
use bytes::Bytes;
use data_encoding::BASE64URL_NOPAD;

/// Builds a syntactically valid 43-char data item id from a single repeated
/// byte, so tests don't have to hand-roll base64.
pub fn sample_id(byte: u8) -> DataItemId {
    DataItemId::new(BASE64URL_NOPAD.encode(&[byte; 32])).unwrap()
}

pub struct FakeWallet {
    owner: String,
}

impl FakeWallet {
    pub fn new() -> Self {
        Self {
            owner: BASE64URL_NOPAD.encode(&[7u8; 32]),
        }
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn address(&self) -> &str {
        &self.owner
    }

    async fn sign(&self, message: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from(message.to_vec()))
    }
}

pub struct FakePricingService {
    pub reward: u64,
}

impl FakePricingService {
    pub fn new(reward: u64) -> Self {
        Self { reward }
    }
}

#[async_trait]
impl PricingService for FakePricingService {
    async fn get_bundle_reward(&self, _byte_count: u64) -> Result<BundleReward> {
        Ok(BundleReward { reward: self.reward })
    }

    async fn get_usd_to_ar_rate(&self) -> Result<f64> {
        Ok(1.0)
    }
}

/// A gateway whose `post_bundle` outcome and `get_tx_status` response are set
/// up front, and which counts how many chunks `post_chunk` received.
pub struct FakeGateway {
    pub post_bundle_fails: bool,
    pub status: Mutex<TxStatus>,
    pub block_height: u64,
    pub chunks_posted: AtomicU64,
}

impl FakeGateway {
    pub fn new(status: TxStatus) -> Self {
        Self {
            post_bundle_fails: false,
            status: Mutex::new(status),
            block_height: 100,
            chunks_posted: AtomicU64::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            post_bundle_fails: true,
            ..Self::new(TxStatus::NotFound)
        }
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn post_bundle(&self, _envelope: &TxEnvelope) -> Result<()> {
        if self.post_bundle_fails {
            return Err(bf_types::PipelineError::Gateway("simulated post failure".to_string()));
        }
        Ok(())
    }

    async fn post_chunk(&self, _tx_id: &str, _data_offset: u64, _chunk: Bytes) -> Result<()> {
        self.chunks_posted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_tx_status(&self, _tx_id: &str) -> Result<TxStatus> {
        Ok(self.status.lock().unwrap().clone())
    }

    async fn get_block_height(&self) -> Result<u64> {
        Ok(self.block_height)
    }

    async fn get_balance(&self, _address: &str) -> Result<u64> {
        Ok(u64::MAX)
    }
}
