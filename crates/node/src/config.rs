//! Environment-driven configuration. Loaded once at startup; a missing
//! required variable is a fatal, logged, non-zero-exit error rather than a
//! panic deep in some client constructor.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bf_types::{PackerConfig, VerifyThresholds, DEFAULT_BATCHING_SIZE};

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow!("missing required environment variable {name}"))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value for {name}: {e}")),
        Err(_) => Ok(default),
    }
}

/// The three durable queues the worker host consumes from directly.
pub struct QueueUrls {
    pub prepare_bundle: String,
    pub post_bundle: String,
    pub seed_bundle: String,
}

/// Worker counts for the core job queues and the side-queues the pipeline
/// feeds but does not itself consume (optical indexing, BDI unbundling,
/// ingress's own new-data-item insert queue: their handlers are external
/// collaborators, out of scope for this worker host, but the knob is kept
/// here so the full environment variable surface loads without error).
pub struct ConsumerCounts {
    pub prepare_bundle: usize,
    pub post_bundle: usize,
    pub seed_bundle: usize,
    pub finalize_upload: usize,
    pub optical: usize,
    pub new_data_item_insert: usize,
    pub unbundle_bdi: usize,
}

pub struct SchedulerConfig {
    pub plan_bundle_enabled: bool,
    pub verify_bundle_enabled: bool,
    pub plan_bundle_interval: Duration,
    pub verify_bundle_interval: Duration,
}

pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub migrate_on_startup: bool,
}

pub struct ObjectStoreConfig {
    pub bucket: String,
    pub backup_bucket: Option<String>,
}

pub struct GatewayConfig {
    pub base_url: String,
    pub http_retries: u32,
}

pub struct Config {
    pub queues: QueueUrls,
    pub consumers: ConsumerCounts,
    pub schedulers: SchedulerConfig,
    pub packer: PackerConfig,
    pub verify_thresholds: VerifyThresholds,
    pub batching_size: usize,
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    pub gateway: GatewayConfig,
    pub pricing_service_url: String,
    pub arweave_wallet_path: String,
    pub http_port: u16,
    pub bundler_app_name: Option<String>,
}

impl Config {
    pub fn load_from_env() -> Result<Self> {
        let queues = QueueUrls {
            prepare_bundle: required("SQS_PREPARE_BUNDLE_URL")?,
            post_bundle: required("SQS_POST_BUNDLE_URL")?,
            seed_bundle: required("SQS_SEED_BUNDLE_URL")?,
        };

        let consumers = ConsumerCounts {
            prepare_bundle: optional_parsed("NUM_PREPARE_BUNDLE_CONSUMERS", 2)?,
            post_bundle: optional_parsed("NUM_POST_BUNDLE_CONSUMERS", 2)?,
            seed_bundle: optional_parsed("NUM_SEED_BUNDLE_CONSUMERS", 2)?,
            finalize_upload: optional_parsed("NUM_FINALIZE_UPLOAD_CONSUMERS", 2)?,
            optical: optional_parsed("NUM_OPTICAL_CONSUMERS", 3)?,
            new_data_item_insert: optional_parsed("NUM_NEW_DATA_ITEM_INSERT_CONSUMERS", 1)?,
            unbundle_bdi: optional_parsed("NUM_UNBUNDLE_BDI_CONSUMERS", 1)?,
        };

        let schedulers = SchedulerConfig {
            plan_bundle_enabled: optional_parsed("PLAN_BUNDLE_ENABLED", true)?,
            verify_bundle_enabled: optional_parsed("VERIFY_BUNDLE_ENABLED", true)?,
            plan_bundle_interval: Duration::from_millis(optional_parsed(
                "PLAN_BUNDLE_INTERVAL_MS",
                60_000,
            )?),
            verify_bundle_interval: Duration::from_millis(optional_parsed(
                "VERIFY_BUNDLE_INTERVAL_MS",
                60_000,
            )?),
        };

        let packer = PackerConfig {
            max_bundle_size: optional_parsed("MAX_BUNDLE_SIZE", 2 * 1024 * 1024 * 1024)?,
            max_data_item_size: optional_parsed("MAX_DATA_ITEM_SIZE", 4 * 1024 * 1024 * 1024)?,
            ..PackerConfig::default()
        };

        let verify_thresholds = VerifyThresholds::default();
        let batching_size = DEFAULT_BATCHING_SIZE;

        let database = DatabaseConfig {
            url: database_url()?,
            max_connections: optional_parsed("DB_POOL_MAX_CONNECTIONS", 10)?,
            migrate_on_startup: optional_parsed("MIGRATE_ON_STARTUP", false)?,
        };

        let object_store = ObjectStoreConfig {
            bucket: required("DATA_ITEM_BUCKET")?,
            backup_bucket: std::env::var("BACKUP_DATA_ITEM_BUCKET").ok(),
        };

        let gateway = GatewayConfig {
            base_url: optional("ARWEAVE_GATEWAY", "https://arweave.net:443"),
            http_retries: optional_parsed("GATEWAY_HTTP_RETRIES", 8)?,
        };

        let http_port: u16 = match std::env::var("FULFILLMENT_PORT").or_else(|_| std::env::var("PORT")) {
            Ok(raw) => raw.parse().map_err(|e| anyhow!("invalid port: {e}"))?,
            Err(_) => 3000,
        };

        Ok(Self {
            queues,
            consumers,
            schedulers,
            packer,
            verify_thresholds,
            batching_size,
            database,
            object_store,
            gateway,
            pricing_service_url: required("PRICING_SERVICE_URL")?,
            arweave_wallet_path: required("ARWEAVE_WALLET_PATH")?,
            http_port,
            bundler_app_name: std::env::var("BUNDLER_APP_NAME").ok(),
        })
    }
}

/// Builds a `postgres://` connection string from the writer endpoint (or
/// discrete host/port) plus credentials, matching the primary connection the
/// worker host writes through.
fn database_url() -> Result<String> {
    let (host, port) = match std::env::var("DB_WRITER_ENDPOINT") {
        Ok(endpoint) => split_host_port(&endpoint)?,
        Err(_) => (
            required("DB_HOST").context("no DB_WRITER_ENDPOINT or DB_HOST set")?,
            optional("DB_PORT", "5432"),
        ),
    };
    let user = required("DB_USER")?;
    let password = required("DB_PASSWORD")?;
    let database = required("DB_DATABASE")?;
    Ok(format!("postgres://{user}:{password}@{host}:{port}/{database}"))
}

fn split_host_port(endpoint: &str) -> Result<(String, String)> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("DB_WRITER_ENDPOINT must be host:port, got {endpoint:?}"))?;
    Ok((host.to_string(), port.to_string()))
}
