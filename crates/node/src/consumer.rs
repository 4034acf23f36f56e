//! A pool of queue consumer tasks: each long-polls its queue, runs the
//! handler for every message received, and acks (delete) or nacks (reset
//! visibility to zero) according to the handler's result.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bf_capabilities::{Queue, QueueConfig};
use bf_queue::HeartbeatGuard;
use bf_telemetry::queue_metrics;

use crate::shutdown::ShutdownCoordinator;

/// Spawns `concurrency` consumer tasks against `queue`, each running
/// `handler` for every message received, until a shutdown signal fires.
/// Returns once all spawned tasks have been handed to the shutdown
/// coordinator for tracking.
pub fn spawn_consumer_pool<H, Fut>(
    queue_name: &'static str,
    queue: Arc<dyn Queue>,
    config: QueueConfig,
    concurrency: usize,
    coordinator: &Arc<ShutdownCoordinator>,
    handler: H,
) where
    H: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    let handler = Arc::new(handler);
    for worker_id in 0..concurrency {
        let queue = Arc::clone(&queue);
        let config = config.clone();
        let handler = Arc::clone(&handler);
        let coordinator = Arc::clone(coordinator);
        let inflight = coordinator.inflight_count();
        let running = coordinator.running_consumers();
        running.fetch_add(1, Ordering::SeqCst);

        let mut shutdown_rx = coordinator.subscribe();
        let join = tokio::spawn(async move {
            loop {
                let messages = tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    result = queue.receive(&config) => result,
                };
                let messages = match messages {
                    Ok(messages) => messages,
                    Err(error) => {
                        tracing::warn!(queue = queue_name, worker_id, %error, "queue receive failed");
                        continue;
                    }
                };

                for message in messages {
                    inflight.fetch_add(1, Ordering::SeqCst);
                    queue_metrics().set_inflight(inflight.load(Ordering::SeqCst) as i64);
                    queue_metrics().inc_messages_received(queue_name);

                    let heartbeat = config.heartbeat_interval.map(|interval| {
                        HeartbeatGuard::start(
                            Arc::clone(&queue),
                            message.receipt_handle.clone(),
                            interval,
                            config.visibility_timeout,
                        )
                    });

                    let started = std::time::Instant::now();
                    let result = handler(message.body.clone()).await;
                    queue_metrics().observe_handler_duration(queue_name, started.elapsed().as_secs_f64());
                    drop(heartbeat);

                    match result {
                        Ok(()) => {
                            if let Err(error) = queue.delete(&message.receipt_handle).await {
                                tracing::warn!(queue = queue_name, %error, "failed to delete completed message");
                            }
                            queue_metrics().inc_messages_completed(queue_name);
                        }
                        Err(error_message) => {
                            tracing::warn!(queue = queue_name, error = %error_message, "message handler failed");
                            if config.terminate_visibility_timeout_on_error {
                                if let Err(error) = queue
                                    .change_visibility(&message.receipt_handle, std::time::Duration::ZERO)
                                    .await
                                {
                                    tracing::warn!(queue = queue_name, %error, "failed to reset visibility after error");
                                }
                            }
                            queue_metrics().inc_messages_failed(queue_name);
                        }
                    }

                    inflight.fetch_sub(1, Ordering::SeqCst);
                    queue_metrics().set_inflight(inflight.load(Ordering::SeqCst) as i64);
                }
            }
            running.fetch_sub(1, Ordering::SeqCst);
        });

        tokio::spawn({
            let coordinator = Arc::clone(coordinator);
            async move { coordinator.track(join).await }
        });
    }
}
