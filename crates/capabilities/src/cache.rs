//! The in-flight cache capability: a short-TTL, per-process record of data
//! item ids currently being ingested, used by ingress to reject duplicate
//! uploads within a single instance's lifetime.
//!
//! This is consulted by ingress, not by the core pipeline, but the trait
//! lives here so a single concrete implementation (`bf-storage::cache`) can
//! be shared and unit-tested alongside the other capabilities.

use async_trait::async_trait;
use bf_types::Result;
use std::time::Duration;

#[async_trait]
pub trait CacheService: Send + Sync {
    /// Records `key` as present for `ttl`, returning `true` if it was not
    /// already present (i.e. this call "won" the race).
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Returns whether `key` is currently present.
    async fn contains(&self, key: &str) -> Result<bool>;
}
