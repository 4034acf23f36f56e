//! SQS-backed `Queue`. `receive` long-polls via
//! `WaitTimeSeconds`; `change_visibility` is also used by a caller-managed
//! heartbeat task to keep a message invisible while its handler is still
//! running longer than the configured visibility timeout.

use async_trait::async_trait;
use aws_sdk_sqs::Client;
use bf_capabilities::{Message, Queue, QueueConfig};
use bf_types::{PipelineError, Result};
use std::time::Duration;

pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), queue_url)
    }
}

#[async_trait]
impl Queue for SqsQueue {
    async fn send(&self, body: &str) -> Result<()> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("sqs send_message: {e}")))?;
        Ok(())
    }

    async fn receive(&self, config: &QueueConfig) -> Result<Vec<Message>> {
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(config.batch_size.clamp(1, 10) as i32)
            .wait_time_seconds(config.polling_wait.as_secs().min(20) as i32)
            .visibility_timeout(config.visibility_timeout.as_secs() as i32)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("sqs receive_message: {e}")))?;

        Ok(resp
            .messages()
            .iter()
            .filter_map(|m| {
                Some(Message {
                    receipt_handle: m.receipt_handle()?.to_string(),
                    body: m.body()?.to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("sqs delete_message: {e}")))?;
        Ok(())
    }

    async fn change_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(timeout.as_secs() as i32)
            .send()
            .await
            .map_err(|e| PipelineError::Fatal(format!("sqs change_message_visibility: {e}")))?;
        Ok(())
    }
}
