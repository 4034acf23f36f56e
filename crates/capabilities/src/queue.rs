//! The `Queue` capability: named, durable, at-least-once queues with
//! visibility-timeout redelivery.

use async_trait::async_trait;
use bf_types::Result;
use std::time::Duration;

/// A single received message, opaque to the caller beyond its body and a
/// receipt handle used to delete or change its visibility.
#[derive(Debug, Clone)]
pub struct Message {
    pub receipt_handle: String,
    pub body: String,
}

/// Per-queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub batch_size: u32,
    pub visibility_timeout: Duration,
    pub heartbeat_interval: Option<Duration>,
    pub polling_wait: Duration,
    pub terminate_visibility_timeout_on_error: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            visibility_timeout: Duration::from_secs(90),
            heartbeat_interval: None,
            polling_wait: Duration::from_secs(10),
            terminate_visibility_timeout_on_error: true,
        }
    }
}

/// A named, durable, at-least-once delivery queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Publishes a JSON-serializable body onto the queue.
    async fn send(&self, body: &str) -> Result<()>;

    /// Long-polls for up to `config.batch_size` messages, waiting at most
    /// `config.polling_wait`. Returns an empty vec on timeout; never blocks
    /// forever.
    async fn receive(&self, config: &QueueConfig) -> Result<Vec<Message>>;

    /// Permanently removes a message after successful processing.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Resets a message's visibility timeout to `timeout` (zero makes it
    /// immediately redeliverable; used on handler error when
    /// `terminate_visibility_timeout_on_error` is set, and periodically by a
    /// heartbeat task to extend the window while a handler is still running).
    async fn change_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<()>;
}
