//! The `Gateway` capability: the anchor-network collaborator used to submit
//! bundle transactions, seed payload chunks, and check for confirmations.

use async_trait::async_trait;
use bf_types::Result;
use bytes::Bytes;

/// The gateway's view of a submitted transaction's on-chain status.
#[derive(Debug, Clone)]
pub enum TxStatus {
    /// Not (yet, or any longer) visible on-chain.
    NotFound,
    /// Visible with the given confirmation count and the block it landed in.
    Confirmed { confirmations: u64, block_height: u64 },
}

/// A signed bundle transaction envelope, ready to submit to the gateway.
#[derive(Debug, Clone)]
pub struct TxEnvelope {
    pub id: String,
    pub owner: String,
    pub last_tx: String,
    pub tags: Vec<(String, String)>,
    pub data_root: String,
    pub data_size: u64,
    pub signature: String,
    pub reward: u64,
}

/// The anchor-network gateway. All core consumers treat calls as fallible and
/// retried with exponential backoff by the concrete HTTP client;
/// this trait only describes the logical operations.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Submits a signed bundle transaction.
    async fn post_bundle(&self, envelope: &TxEnvelope) -> Result<()>;

    /// Uploads one chunk of the bundle payload, identified by its offset into
    /// the transaction's data root. `chunk` includes the data-path proof.
    async fn post_chunk(&self, tx_id: &str, data_offset: u64, chunk: Bytes) -> Result<()>;

    /// Queries the on-chain status of a previously submitted transaction.
    async fn get_tx_status(&self, tx_id: &str) -> Result<TxStatus>;

    /// Returns the current chain tip height.
    async fn get_block_height(&self) -> Result<u64>;

    /// Returns the winston balance of `address`.
    async fn get_balance(&self, address: &str) -> Result<u64>;
}
