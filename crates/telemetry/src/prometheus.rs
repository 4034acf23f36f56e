//! Concrete `MetricsSink` backed by the `prometheus` crate's default registry.
//!
//! Registration failures here (duplicate metric names, malformed label sets)
//! are a static, compile-time-checkable property of this module, so panicking
//! during `Lazy` initialization is treated the same as a failed `static`.
#![allow(clippy::expect_used)]

use crate::sinks::{
    ErrorMetricsSink, JobMetricsSink, PipelineMetricsSink, QueueMetricsSink, StorageMetricsSink,
    SINK,
};
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

struct PrometheusSink {
    queue_received: IntCounterVec,
    queue_completed: IntCounterVec,
    queue_failed: IntCounterVec,
    queue_handler_duration: HistogramVec,
    queue_inflight: IntGauge,

    tick_started: IntCounterVec,
    tick_completed: IntCounterVec,
    tick_error: IntCounterVec,
    tick_overdue: IntCounterVec,
    tick_duration: HistogramVec,

    transitions: IntCounterVec,
    data_items_planned: IntCounterVec,
    data_items_permanent: IntCounterVec,
    data_items_repacked: IntCounterVec,
    data_items_failed: IntCounterVec,

    db_operation_duration: HistogramVec,
    lock_conflicts: IntCounterVec,
    object_store_duration: HistogramVec,
    object_store_errors: IntCounterVec,

    errors: IntCounterVec,
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrometheusSink")
    }
}

static METRICS: Lazy<PrometheusSink> = Lazy::new(|| PrometheusSink {
    queue_received: register_int_counter_vec!(
        "bf_queue_messages_received_total",
        "Messages received from a queue",
        &["queue"]
    )
    .expect("metric registration"),
    queue_completed: register_int_counter_vec!(
        "bf_queue_messages_completed_total",
        "Messages whose handler completed and were deleted",
        &["queue"]
    )
    .expect("metric registration"),
    queue_failed: register_int_counter_vec!(
        "bf_queue_messages_failed_total",
        "Messages whose handler returned an error",
        &["queue"]
    )
    .expect("metric registration"),
    queue_handler_duration: register_histogram_vec!(
        "bf_queue_handler_duration_seconds",
        "Time spent running a queue message handler",
        &["queue"]
    )
    .expect("metric registration"),
    queue_inflight: register_int_gauge!(
        "bf_queue_messages_inflight",
        "Messages currently being processed across all consumers"
    )
    .expect("metric registration"),

    tick_started: register_int_counter_vec!(
        "bf_job_tick_started_total",
        "Job scheduler ticks started",
        &["job"]
    )
    .expect("metric registration"),
    tick_completed: register_int_counter_vec!(
        "bf_job_tick_completed_total",
        "Job scheduler ticks completed without error",
        &["job"]
    )
    .expect("metric registration"),
    tick_error: register_int_counter_vec!(
        "bf_job_tick_error_total",
        "Job scheduler ticks that returned an error",
        &["job"]
    )
    .expect("metric registration"),
    tick_overdue: register_int_counter_vec!(
        "bf_job_tick_overdue_total",
        "Job scheduler ticks still running when the next tick was due",
        &["job"]
    )
    .expect("metric registration"),
    tick_duration: register_histogram_vec!(
        "bf_job_tick_duration_seconds",
        "Time spent running a single job tick",
        &["job"]
    )
    .expect("metric registration"),

    transitions: register_int_counter_vec!(
        "bf_pipeline_transitions_total",
        "Entity state transitions observed by the pipeline",
        &["from_state", "to_state"]
    )
    .expect("metric registration"),
    data_items_planned: register_int_counter_vec!(
        "bf_data_items_planned_total",
        "Data items moved into a bundle plan",
        &["unused"]
    )
    .expect("metric registration"),
    data_items_permanent: register_int_counter_vec!(
        "bf_data_items_permanent_total",
        "Data items confirmed permanent",
        &["unused"]
    )
    .expect("metric registration"),
    data_items_repacked: register_int_counter_vec!(
        "bf_data_items_repacked_total",
        "Data items returned to new for repacking",
        &["unused"]
    )
    .expect("metric registration"),
    data_items_failed: register_int_counter_vec!(
        "bf_data_items_failed_total",
        "Data items moved to failed",
        &["unused"]
    )
    .expect("metric registration"),

    db_operation_duration: register_histogram_vec!(
        "bf_db_operation_duration_seconds",
        "Database operation latency",
        &["operation"]
    )
    .expect("metric registration"),
    lock_conflicts: register_int_counter_vec!(
        "bf_db_lock_conflicts_total",
        "FOR UPDATE NOWAIT lock conflicts observed",
        &["operation"]
    )
    .expect("metric registration"),
    object_store_duration: register_histogram_vec!(
        "bf_object_store_operation_duration_seconds",
        "Object store operation latency",
        &["operation"]
    )
    .expect("metric registration"),
    object_store_errors: register_int_counter_vec!(
        "bf_object_store_errors_total",
        "Object store operation errors",
        &["operation"]
    )
    .expect("metric registration"),

    errors: register_int_counter_vec!(
        "bf_errors_total",
        "Errors observed, keyed by kind and stable error code",
        &["kind", "code"]
    )
    .expect("metric registration"),
});

impl QueueMetricsSink for PrometheusSink {
    fn inc_messages_received(&self, queue: &str) {
        self.queue_received.with_label_values(&[queue]).inc();
    }
    fn inc_messages_completed(&self, queue: &str) {
        self.queue_completed.with_label_values(&[queue]).inc();
    }
    fn inc_messages_failed(&self, queue: &str) {
        self.queue_failed.with_label_values(&[queue]).inc();
    }
    fn observe_handler_duration(&self, queue: &str, duration_secs: f64) {
        self.queue_handler_duration
            .with_label_values(&[queue])
            .observe(duration_secs);
    }
    fn set_inflight(&self, count: i64) {
        self.queue_inflight.set(count);
    }
}

impl JobMetricsSink for PrometheusSink {
    fn inc_tick_started(&self, job: &str) {
        self.tick_started.with_label_values(&[job]).inc();
    }
    fn inc_tick_completed(&self, job: &str) {
        self.tick_completed.with_label_values(&[job]).inc();
    }
    fn inc_tick_error(&self, job: &str) {
        self.tick_error.with_label_values(&[job]).inc();
    }
    fn inc_tick_overdue(&self, job: &str) {
        self.tick_overdue.with_label_values(&[job]).inc();
    }
    fn observe_tick_duration(&self, job: &str, duration_secs: f64) {
        self.tick_duration
            .with_label_values(&[job])
            .observe(duration_secs);
    }
}

impl PipelineMetricsSink for PrometheusSink {
    fn inc_transition(&self, from_state: &str, to_state: &str) {
        self.transitions
            .with_label_values(&[from_state, to_state])
            .inc();
    }
    fn inc_data_items_planned(&self, count: u64) {
        self.data_items_planned
            .with_label_values(&["_"])
            .inc_by(count);
    }
    fn inc_data_items_permanent(&self, count: u64) {
        self.data_items_permanent
            .with_label_values(&["_"])
            .inc_by(count);
    }
    fn inc_data_items_repacked(&self, count: u64) {
        self.data_items_repacked
            .with_label_values(&["_"])
            .inc_by(count);
    }
    fn inc_data_items_failed(&self, count: u64) {
        self.data_items_failed
            .with_label_values(&["_"])
            .inc_by(count);
    }
}

impl StorageMetricsSink for PrometheusSink {
    fn observe_db_operation(&self, operation: &str, duration_secs: f64) {
        self.db_operation_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
    fn inc_lock_conflict(&self, operation: &str) {
        self.lock_conflicts.with_label_values(&[operation]).inc();
    }
    fn observe_object_store_operation(&self, operation: &str, duration_secs: f64) {
        self.object_store_duration
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
    fn inc_object_store_error(&self, operation: &str) {
        self.object_store_errors
            .with_label_values(&[operation])
            .inc();
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, code: &'static str) {
        self.errors.with_label_values(&[kind, code]).inc();
    }
}

/// Registers all metrics with the process-global Prometheus registry and
/// installs the sink returned by `sinks::*_metrics()`. Idempotent; subsequent
/// calls are no-ops.
pub fn install() {
    Lazy::force(&METRICS);
    let _ = SINK.set(&*METRICS);
}

/// Renders the current state of the default registry in the Prometheus text
/// exposition format.
pub fn render() -> String {
    use prometheus::{Encoder, TextEncoder};
    let families = prometheus::gather();
    let mut buf = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buf)
        .expect("prometheus encoding is infallible for well-formed metrics");
    String::from_utf8(buf).expect("prometheus text encoding is always valid utf-8")
}
