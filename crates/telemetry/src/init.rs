//! Structured logging bootstrap: JSON-formatted `tracing` events on stdout,
//! filtered by `RUST_LOG`, with `log` macros bridged through `tracing-log` so
//! dependencies that still use `log` show up in the same stream.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global `tracing` subscriber. Call once, at process start.
///
/// `RUST_LOG` is honored; if unset, defaults to `info` for this crate's
/// targets and `warn` for everything else.
pub fn init_tracing(service_name: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{service_name}=info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing_log::LogTracer::init()
        .map_err(|e| anyhow::anyhow!("failed to bridge log crate into tracing: {e}"))?;

    Ok(())
}
