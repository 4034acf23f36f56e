#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! Structured logging, Prometheus metrics sinks, and the `/health` +
//! `/metrics` HTTP surface shared by every binary in the workspace.

pub mod http;
pub mod init;
pub mod prometheus;
pub mod sinks;
pub mod time;

pub use http::{run_server, HealthState};
pub use init::init_tracing;
pub use sinks::{
    error_metrics, job_metrics, pipeline_metrics, queue_metrics, storage_metrics,
    ErrorMetricsSink, JobMetricsSink, MetricsSink, NopSink, PipelineMetricsSink,
    QueueMetricsSink, StorageMetricsSink,
};
pub use time::Timer;
