//! Extends a message's visibility timeout on a fixed interval while its
//! handler is still running, so a slow handler is not redelivered to another
//! worker mid-flight.

use bf_capabilities::Queue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawns a background task that calls `change_visibility` every `interval`
/// until dropped. Drop the returned guard to stop the heartbeat (e.g. once
/// the handler completes).
pub struct HeartbeatGuard {
    handle: JoinHandle<()>,
}

impl HeartbeatGuard {
    pub fn start(
        queue: Arc<dyn Queue>,
        receipt_handle: String,
        interval: Duration,
        visibility_timeout: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(error) = queue.change_visibility(&receipt_handle, visibility_timeout).await {
                    tracing::warn!(%error, "heartbeat failed to extend message visibility");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
