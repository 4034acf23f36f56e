//! An in-memory `Queue` with per-message visibility deadlines, used by
//! `bf-jobs`'s tests to deterministically exercise redelivery.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use bf_capabilities::{Message, Queue, QueueConfig};
use bf_types::Result;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct Entry {
    receipt_handle: String,
    body: String,
    visible_at: Instant,
}

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Entry>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: number of messages currently enqueued, visible or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, body: &str) -> Result<()> {
        self.entries.lock().unwrap().push_back(Entry {
            receipt_handle: Uuid::new_v4().to_string(),
            body: body.to_string(),
            visible_at: Instant::now(),
        });
        Ok(())
    }

    async fn receive(&self, config: &QueueConfig) -> Result<Vec<Message>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let mut out = Vec::new();
        for entry in entries.iter_mut() {
            if entry.visible_at <= now {
                entry.visible_at = now + config.visibility_timeout;
                out.push(Message {
                    receipt_handle: entry.receipt_handle.clone(),
                    body: entry.body.clone(),
                });
                if out.len() as u32 >= config.batch_size {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.receipt_handle != receipt_handle);
        Ok(())
    }

    async fn change_visibility(&self, receipt_handle: &str, timeout: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.receipt_handle == receipt_handle) {
            entry.visible_at = Instant::now() + timeout;
        }
        Ok(())
    }
}
