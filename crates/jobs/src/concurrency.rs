//! A bounded-concurrency fan-out helper used by every job that processes a
//! batch of independent units (plans, data items, bundles) with a cap on how
//! many run at once against the database/object store/gateway.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Runs `f` once per item in `items`, with at most `limit` invocations
/// in flight at a time, and collects the results in input order.
pub async fn limited_for_each<T, F, Fut, R>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = R> + Send,
    R: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let f = Arc::new(f);
    let tasks = items.into_iter().map(|item| {
        let semaphore = Arc::clone(&semaphore);
        let f = Arc::clone(&f);
        async move {
            // `semaphore` is local to this call and never closed.
            #[allow(clippy::expect_used)]
            let _permit = semaphore.acquire().await.expect("semaphore is never closed");
            f(item).await
        }
    });
    join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_every_item_and_preserves_order() {
        let items: Vec<u32> = (0..20).collect();
        let results = limited_for_each(items, 4, |i| async move { i * 2 }).await;
        let expected: Vec<u32> = (0..20).map(|i| i * 2).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..50).collect();
        let active2 = Arc::clone(&active);
        let max_seen2 = Arc::clone(&max_seen);
        limited_for_each(items, 5, move |_| {
            let active = Arc::clone(&active2);
            let max_seen = Arc::clone(&max_seen2);
            async move {
                let n = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert!(max_seen.load(Ordering::SeqCst) <= 5);
    }
}
