//! The worker host binary: loads configuration from the environment, wires
//! concrete capability clients, and runs the job queue consumers and
//! schedulers until asked to shut down.

mod config;
mod consumer;
mod shutdown;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bf_capabilities::{Database, Gateway, ObjectStore, PricingService, Queue, QueueConfig, Wallet};
use bf_client::{HttpGateway, HttpPricingService, JwkWallet};
use bf_jobs::scheduler::JobScheduler;
use bf_jobs::{post, prepare, seed};
use bf_queue::SqsQueue;
use bf_storage::{BackupObjectStore, PgDatabase, S3ObjectStore};
use bf_telemetry::HealthState;
use bf_types::PlanId;
use serde::Deserialize;

use config::Config;
use shutdown::ShutdownCoordinator;

#[derive(Deserialize)]
struct PlanIdMessage {
    #[serde(rename = "planId")]
    plan_id: PlanId,
}

fn parse_plan_id(body: &str) -> Result<PlanId, String> {
    serde_json::from_str::<PlanIdMessage>(body)
        .map(|m| m.plan_id)
        .map_err(|e| format!("malformed message body: {e}"))
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        tracing::error!(%error, "bf-node exited with a fatal error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    bf_telemetry::init_tracing("bf-node")?;
    bf_telemetry::prometheus::install();

    let config = Config::load_from_env()?;

    let database: Arc<dyn Database> = {
        let pg = PgDatabase::connect(&config.database.url, config.database.max_connections).await?;
        if config.database.migrate_on_startup {
            pg.migrate().await?;
        }
        Arc::new(pg)
    };

    let object_store: Arc<dyn ObjectStore> = {
        let primary = S3ObjectStore::from_env(&config.object_store.bucket).await;
        let backup = match &config.object_store.backup_bucket {
            Some(bucket) => Some(Arc::new(S3ObjectStore::from_env(bucket).await) as Arc<dyn ObjectStore>),
            None => None,
        };
        Arc::new(BackupObjectStore::new(Arc::new(primary), backup))
    };

    let prepare_queue: Arc<dyn Queue> = Arc::new(SqsQueue::from_env(&config.queues.prepare_bundle).await);
    let post_queue: Arc<dyn Queue> = Arc::new(SqsQueue::from_env(&config.queues.post_bundle).await);
    let seed_queue: Arc<dyn Queue> = Arc::new(SqsQueue::from_env(&config.queues.seed_bundle).await);

    let wallet: Arc<dyn Wallet> = Arc::new(
        JwkWallet::from_file(std::path::Path::new(&config.arweave_wallet_path)).await?,
    );
    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(
        config.gateway.base_url.clone(),
        config.gateway.http_retries,
    ));
    let pricing: Arc<dyn PricingService> = Arc::new(HttpPricingService::new(config.pricing_service_url.clone()));

    let coordinator = ShutdownCoordinator::new();
    let health = HealthState::new();
    let mut schedulers: Vec<Arc<JobScheduler>> = Vec::new();

    let telemetry_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let telemetry_shutdown = {
        let mut rx = coordinator.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    };
    tokio::spawn(bf_telemetry::run_server(telemetry_addr, health.clone(), telemetry_shutdown));

    if config.schedulers.plan_bundle_enabled {
        let scheduler = Arc::new(JobScheduler::new("plan-bundle", config.schedulers.plan_bundle_interval));
        let database = Arc::clone(&database);
        let prepare_queue = Arc::clone(&prepare_queue);
        let packer_config = config.packer.clone();
        let batching_size = config.batching_size;
        let max_data_items = config.packer.max_data_item_limit;
        let inflight = coordinator.inflight_count();
        scheduler.start(move || {
            let database = Arc::clone(&database);
            let prepare_queue = Arc::clone(&prepare_queue);
            let packer_config = packer_config.clone();
            let inflight = Arc::clone(&inflight);
            Box::pin(async move {
                inflight.fetch_add(1, Ordering::SeqCst);
                let result = bf_jobs::plan::run_plan_job(
                    &database,
                    &prepare_queue,
                    &packer_config,
                    max_data_items,
                    batching_size,
                )
                .await;
                inflight.fetch_sub(1, Ordering::SeqCst);
                result.map_err(|e| e.to_string())
            })
        });
        schedulers.push(scheduler);
    }

    if config.schedulers.verify_bundle_enabled {
        let scheduler = Arc::new(JobScheduler::new("verify-bundle", config.schedulers.verify_bundle_interval));
        let database = Arc::clone(&database);
        let object_store = Arc::clone(&object_store);
        let gateway = Arc::clone(&gateway);
        let thresholds = config.verify_thresholds.clone();
        let batching_size = config.batching_size;
        let inflight = coordinator.inflight_count();
        scheduler.start(move || {
            let database = Arc::clone(&database);
            let object_store = Arc::clone(&object_store);
            let gateway = Arc::clone(&gateway);
            let thresholds = thresholds.clone();
            let inflight = Arc::clone(&inflight);
            Box::pin(async move {
                inflight.fetch_add(1, Ordering::SeqCst);
                let result = bf_jobs::verify::run_verify_job(
                    &database,
                    &object_store,
                    &gateway,
                    &thresholds,
                    batching_size,
                )
                .await;
                inflight.fetch_sub(1, Ordering::SeqCst);
                result.map_err(|e| e.to_string())
            })
        });
        schedulers.push(scheduler);
    }

    {
        let database = Arc::clone(&database);
        let object_store = Arc::clone(&object_store);
        let post_queue = Arc::clone(&post_queue);
        let wallet = Arc::clone(&wallet);
        let pricing = Arc::clone(&pricing);
        let gateway = Arc::clone(&gateway);
        let bundler_app_name = config.bundler_app_name.clone();
        consumer::spawn_consumer_pool(
            "prepare-bundle",
            Arc::clone(&prepare_queue),
            QueueConfig {
                heartbeat_interval: Some(Duration::from_secs(60)),
                ..QueueConfig::default()
            },
            config.consumers.prepare_bundle,
            &coordinator,
            move |body| {
                let database = Arc::clone(&database);
                let object_store = Arc::clone(&object_store);
                let post_queue = Arc::clone(&post_queue);
                let wallet = Arc::clone(&wallet);
                let pricing = Arc::clone(&pricing);
                let gateway = Arc::clone(&gateway);
                let bundler_app_name = bundler_app_name.clone();
                async move {
                    let plan_id = parse_plan_id(&body)?;
                    prepare::run_prepare_job(
                        plan_id,
                        &database,
                        &object_store,
                        &post_queue,
                        &wallet,
                        &pricing,
                        &gateway,
                        bundler_app_name.as_deref(),
                    )
                    .await
                    .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let database = Arc::clone(&database);
        let object_store = Arc::clone(&object_store);
        let seed_queue = Arc::clone(&seed_queue);
        let gateway = Arc::clone(&gateway);
        let wallet = Arc::clone(&wallet);
        let pricing = Arc::clone(&pricing);
        let thresholds = config.verify_thresholds.clone();
        consumer::spawn_consumer_pool(
            "post-bundle",
            Arc::clone(&post_queue),
            QueueConfig::default(),
            config.consumers.post_bundle,
            &coordinator,
            move |body| {
                let database = Arc::clone(&database);
                let object_store = Arc::clone(&object_store);
                let seed_queue = Arc::clone(&seed_queue);
                let gateway = Arc::clone(&gateway);
                let wallet = Arc::clone(&wallet);
                let pricing = Arc::clone(&pricing);
                let thresholds = thresholds.clone();
                async move {
                    let plan_id = parse_plan_id(&body)?;
                    post::run_post_job(
                        plan_id,
                        &database,
                        &object_store,
                        &seed_queue,
                        &gateway,
                        &wallet,
                        &pricing,
                        &thresholds,
                    )
                    .await
                    .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let database = Arc::clone(&database);
        let object_store = Arc::clone(&object_store);
        let gateway = Arc::clone(&gateway);
        consumer::spawn_consumer_pool(
            "seed-bundle",
            Arc::clone(&seed_queue),
            QueueConfig {
                heartbeat_interval: Some(Duration::from_secs(60)),
                ..QueueConfig::default()
            },
            config.consumers.seed_bundle,
            &coordinator,
            move |body| {
                let database = Arc::clone(&database);
                let object_store = Arc::clone(&object_store);
                let gateway = Arc::clone(&gateway);
                async move {
                    let plan_id = parse_plan_id(&body)?;
                    seed::run_seed_job(plan_id, &database, &object_store, &gateway)
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    health.mark_ready();
    tracing::info!("bf-node is ready");

    wait_for_shutdown_signal().await;

    tracing::info!("shutdown signal received, draining");
    health.mark_draining();
    for scheduler in &schedulers {
        scheduler.stop().await;
    }
    coordinator.shutdown().await;

    tracing::info!("bf-node shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(error) => {
            tracing::warn!(%error, "failed to install SIGTERM handler, relying on ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
