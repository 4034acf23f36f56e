//! Abstract traits for metrics reporting, decoupling job/infrastructure code
//! from the Prometheus backend.

use once_cell::sync::OnceCell;

/// A no-op sink, used in tests or before `prometheus::install` has run.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the installed `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns the installed queue metrics sink, or a no-op if none was installed.
pub fn queue_metrics() -> &'static dyn QueueMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the installed job/scheduler metrics sink, or a no-op.
pub fn job_metrics() -> &'static dyn JobMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the installed pipeline lifecycle metrics sink, or a no-op.
pub fn pipeline_metrics() -> &'static dyn PipelineMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the installed storage (database + object store) metrics sink, or a no-op.
pub fn storage_metrics() -> &'static dyn StorageMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns the installed error metrics sink, or a no-op.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Metrics for queue consumers: receipt, completion, and failure counts.
pub trait QueueMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_messages_received(&self, queue: &str);
    fn inc_messages_completed(&self, queue: &str);
    fn inc_messages_failed(&self, queue: &str);
    fn observe_handler_duration(&self, queue: &str, duration_secs: f64);
    fn set_inflight(&self, count: i64);
}
impl QueueMetricsSink for NopSink {
    fn inc_messages_received(&self, _queue: &str) {}
    fn inc_messages_completed(&self, _queue: &str) {}
    fn inc_messages_failed(&self, _queue: &str) {}
    fn observe_handler_duration(&self, _queue: &str, _duration_secs: f64) {}
    fn set_inflight(&self, _count: i64) {}
}

/// Metrics for the periodic `JobScheduler` ticks (plan, verify).
pub trait JobMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_tick_started(&self, job: &str);
    fn inc_tick_completed(&self, job: &str);
    fn inc_tick_error(&self, job: &str);
    fn inc_tick_overdue(&self, job: &str);
    fn observe_tick_duration(&self, job: &str, duration_secs: f64);
}
impl JobMetricsSink for NopSink {
    fn inc_tick_started(&self, _job: &str) {}
    fn inc_tick_completed(&self, _job: &str) {}
    fn inc_tick_error(&self, _job: &str) {}
    fn inc_tick_overdue(&self, _job: &str) {}
    fn observe_tick_duration(&self, _job: &str, _duration_secs: f64) {}
}

/// Metrics for bundle/data-item lifecycle transitions.
pub trait PipelineMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_transition(&self, from_state: &str, to_state: &str);
    fn inc_data_items_planned(&self, count: u64);
    fn inc_data_items_permanent(&self, count: u64);
    fn inc_data_items_repacked(&self, count: u64);
    fn inc_data_items_failed(&self, count: u64);
}
impl PipelineMetricsSink for NopSink {
    fn inc_transition(&self, _from_state: &str, _to_state: &str) {}
    fn inc_data_items_planned(&self, _count: u64) {}
    fn inc_data_items_permanent(&self, _count: u64) {}
    fn inc_data_items_repacked(&self, _count: u64) {}
    fn inc_data_items_failed(&self, _count: u64) {}
}

/// Metrics for the database and object-store backends.
pub trait StorageMetricsSink: Send + Sync + std::fmt::Debug {
    fn observe_db_operation(&self, operation: &str, duration_secs: f64);
    fn inc_lock_conflict(&self, operation: &str);
    fn observe_object_store_operation(&self, operation: &str, duration_secs: f64);
    fn inc_object_store_error(&self, operation: &str);
}
impl StorageMetricsSink for NopSink {
    fn observe_db_operation(&self, _operation: &str, _duration_secs: f64) {}
    fn inc_lock_conflict(&self, _operation: &str) {}
    fn observe_object_store_operation(&self, _operation: &str, _duration_secs: f64) {}
    fn inc_object_store_error(&self, _operation: &str) {}
}

/// A sink for recording structured error metrics, keyed by the stable error
/// code from `bf_types::ErrorCode`.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    fn inc_error(&self, kind: &'static str, code: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _code: &'static str) {}
}

/// A unified sink implementing all domain-specific traits, providing a single
/// point of implementation for a metrics backend (here, Prometheus).
pub trait MetricsSink:
    QueueMetricsSink + JobMetricsSink + PipelineMetricsSink + StorageMetricsSink + ErrorMetricsSink
{
}

impl<T> MetricsSink for T where
    T: QueueMetricsSink + JobMetricsSink + PipelineMetricsSink + StorageMetricsSink + ErrorMetricsSink
{
}
