//! A `DashMap`-backed `CacheService`, used both as the production in-process
//! cache (acceptable because a duplicate ingest that slips through is caught
//! downstream by `DataItemExists`) and directly in tests.

use async_trait::async_trait;
use bf_capabilities::CacheService;
use bf_types::Result;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct InProcessCache {
    entries: DashMap<String, Instant>,
}

impl InProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep_expired(&self, key: &str) {
        if let Some(expires_at) = self.entries.get(key).map(|e| *e) {
            if expires_at <= Instant::now() {
                self.entries.remove(key);
            }
        }
    }
}

#[async_trait]
impl CacheService for InProcessCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.sweep_expired(key);
        let expires_at = Instant::now() + ttl;
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.sweep_expired(key);
        Ok(self.entries.contains_key(key))
    }
}
