//! The `Wallet` capability: the signing key used to produce bundle
//! transaction envelopes.

use async_trait::async_trait;
use bf_types::Result;
use bytes::Bytes;

/// A signing wallet. The concrete implementation (`bf-client::wallet`) holds
/// the private key; jobs only ever see this trait, so tests can swap in a
/// deterministic fake without a real keypair.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Returns the wallet's base64url-encoded owner/public-key field, as used
    /// in a transaction envelope's `owner` attribute.
    fn owner(&self) -> &str;

    /// Returns the wallet's on-chain address, derived from `owner`.
    fn address(&self) -> &str;

    /// Signs `message` and returns the raw signature bytes.
    async fn sign(&self, message: &[u8]) -> Result<Bytes>;
}
