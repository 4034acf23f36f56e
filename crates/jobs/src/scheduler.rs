//! Periodic invocation of a job body on a fixed interval, skipping a tick if
//! the previous one is still running and emitting an overdue event instead of
//! piling up concurrent runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use bf_telemetry::job_metrics;

/// An event emitted by a running `JobScheduler`.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started { job: String },
    Completed { job: String },
    Error { job: String, message: String },
    Overdue { job: String },
}

type JobFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Fires `body` every `interval`, skipping a tick if the previous invocation
/// is still in flight. `stop()` cancels future ticks and waits for any
/// in-flight run to settle.
pub struct JobScheduler {
    name: String,
    interval: Duration,
    events: broadcast::Sender<SchedulerEvent>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            interval,
            events,
            handle: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Starts the periodic loop. `body` is called fresh on every tick and
    /// must return a boxed future producing `Ok(())` or `Err(message)`.
    pub fn start<F>(self: &Arc<Self>, mut body: F)
    where
        F: FnMut() -> JobFuture + Send + 'static,
    {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let in_flight = Arc::new(tokio::sync::Mutex::new(()));
            loop {
                ticker.tick().await;
                let Ok(_permit) = in_flight.clone().try_lock_owned() else {
                    job_metrics().inc_tick_overdue(&this.name);
                    let _ = this.events.send(SchedulerEvent::Overdue {
                        job: this.name.clone(),
                    });
                    continue;
                };
                let name = this.name.clone();
                job_metrics().inc_tick_started(&name);
                let _ = this.events.send(SchedulerEvent::Started { job: name.clone() });
                let started = std::time::Instant::now();
                let result = body().await;
                job_metrics().observe_tick_duration(&name, started.elapsed().as_secs_f64());
                match result {
                    Ok(()) => {
                        job_metrics().inc_tick_completed(&name);
                        let _ = this.events.send(SchedulerEvent::Completed { job: name });
                    }
                    Err(message) => {
                        job_metrics().inc_tick_error(&name);
                        tracing::warn!(job = %name, %message, "job tick failed");
                        let _ = this.events.send(SchedulerEvent::Error { job: name, message });
                    }
                }
            }
        });
        #[allow(clippy::unwrap_used)]
        {
            *self.handle.lock().unwrap() = Some(handle);
        }
    }

    /// Cancels future ticks. Does not forcibly interrupt a tick already in
    /// flight; callers that need to wait for drain should await the job's
    /// own in-flight tracking (see `bf-node`'s worker host).
    pub async fn stop(&self) {
        #[allow(clippy::unwrap_used)]
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn fires_on_every_tick() {
        let scheduler = Arc::new(JobScheduler::new("test-job", Duration::from_millis(10)));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        scheduler.start(move || {
            let count = Arc::clone(&count2);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_future_ticks() {
        let scheduler = Arc::new(JobScheduler::new("test-job", Duration::from_millis(5)));
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        scheduler.start(move || {
            let count = Arc::clone(&count2);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop().await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
