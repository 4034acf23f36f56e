//! Graceful shutdown: a broadcast signal plus in-flight/consumer counters so
//! the process can wait for every outstanding message and tick to settle
//! before exiting, instead of dropping work mid-flight.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub struct ShutdownCoordinator {
    sender: broadcast::Sender<()>,
    inflight_count: Arc<AtomicUsize>,
    running_consumers: Arc<AtomicUsize>,
    task_handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(16);
        Arc::new(Self {
            sender,
            inflight_count: Arc::new(AtomicUsize::new(0)),
            running_consumers: Arc::new(AtomicUsize::new(0)),
            task_handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn inflight_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inflight_count)
    }

    pub fn running_consumers(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.running_consumers)
    }

    pub async fn track(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().await.push(handle);
    }

    /// Broadcasts the shutdown signal, then waits for every tracked task to
    /// finish and for `inflight_count`/`running_consumers` to reach zero.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(());

        loop {
            if self.inflight_count.load(Ordering::SeqCst) == 0
                && self.running_consumers.load(Ordering::SeqCst) == 0
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        let mut handles = self.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(error) = handle.await {
                tracing::warn!(%error, "a worker task panicked during shutdown");
            }
        }
    }
}
