//! The plan job: drains the `new-data-item` backlog into
//! `BundlePlan`s and hands each off to the `prepare-bundle` queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bf_capabilities::{Database, Queue};
use bf_packer::{pack, PackItem};
use bf_types::{DataItemId, PackerConfig, PlanId, Result};
use chrono::Utc;
use serde::Serialize;

use crate::concurrency::limited_for_each;

/// A hard cap on how long a single plan-job invocation may keep draining the
/// backlog before yielding back to the scheduler, so one tick can never
/// occupy a worker indefinitely.
const MAX_DRAIN_WALL_CLOCK: Duration = Duration::from_secs(14 * 60);

/// Concurrency for `insertBundlePlan` + enqueue across the plans produced by
/// a single pack invocation.
const PLAN_ENQUEUE_CONCURRENCY: usize = 5;

#[derive(Serialize)]
struct PrepareBundleMessage {
    #[serde(rename = "planId")]
    plan_id: PlanId,
}

/// Runs the plan job once: repeatedly reads new data items, packs them, and
/// commits each resulting plan, until the backlog is empty or the wall-clock
/// budget is spent.
pub async fn run_plan_job(
    database: &Arc<dyn Database>,
    prepare_queue: &Arc<dyn Queue>,
    packer_config: &PackerConfig,
    max_data_items_per_bundle: usize,
    batching_size: usize,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if started.elapsed() >= MAX_DRAIN_WALL_CLOCK {
            tracing::info!("plan job hit its wall-clock budget, yielding to the next tick");
            return Ok(());
        }

        let new_items = database.get_new_data_items(max_data_items_per_bundle).await?;
        if new_items.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let pack_items: Vec<PackItem<DataItemId>> = new_items
            .iter()
            .map(|item| PackItem {
                data_item_id: item.core.data_item_id.clone(),
                byte_count: item.core.byte_count,
                uploaded_date: item.core.uploaded_date,
                premium_feature_type: item.core.premium_feature_type.clone(),
            })
            .collect();
        let plans = pack(pack_items, packer_config, now);
        if plans.is_empty() {
            return Ok(());
        }

        let database = Arc::clone(database);
        let prepare_queue = Arc::clone(prepare_queue);
        let results = limited_for_each(plans, PLAN_ENQUEUE_CONCURRENCY, move |plan| {
            let database = Arc::clone(&database);
            let prepare_queue = Arc::clone(&prepare_queue);
            async move { commit_one_plan(&database, &prepare_queue, plan.data_item_ids, batching_size).await }
        })
        .await;

        for result in results {
            if let Err(err) = result {
                tracing::warn!(error = %err, "failed to commit a bundle plan, continuing with the rest");
            }
        }
    }
}

async fn commit_one_plan(
    database: &Arc<dyn Database>,
    prepare_queue: &Arc<dyn Queue>,
    data_item_ids: Vec<DataItemId>,
    batching_size: usize,
) -> Result<()> {
    let plan_id = PlanId::generate();
    let planned = database
        .insert_bundle_plan(plan_id, data_item_ids, batching_size)
        .await?;
    if planned.is_empty() {
        // Every item was snatched by a concurrent planner; `insert_bundle_plan`
        // already deleted the orphaned `bundle_plan` row.
        return Ok(());
    }
    let body = serde_json::to_string(&PrepareBundleMessage { plan_id })
        .map_err(|e| bf_types::PipelineError::Fatal(format!("serializing prepare-bundle message: {e}")))?;
    prepare_queue.send(&body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_id;
    use bf_capabilities::NewDataItemInput;
    use bf_queue::MemoryQueue;
    use bf_storage::MemoryDatabase;
    use bf_types::SignatureType;

    fn input(byte: u8, age_seconds: i64) -> NewDataItemInput {
        NewDataItemInput {
            data_item_id: sample_id(byte),
            owner_address: "owner".to_string(),
            byte_count: 1_000,
            payload_data_start: 0,
            signature_type: SignatureType::Arweave,
            signature: vec![1, 2, 3],
            assessed_winston_price: 10,
            uploaded_date: Utc::now() - chrono::Duration::seconds(age_seconds),
            deadline_height: None,
            premium_feature_type: None,
            payload_content_type: None,
        }
    }

    #[tokio::test]
    async fn drains_backlog_into_a_plan_and_enqueues_prepare() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let prepare_queue_concrete = Arc::new(MemoryQueue::new());
        let prepare_queue: Arc<dyn Queue> = prepare_queue_concrete.clone();

        database
            .insert_new_data_item_batch(vec![input(1, 0), input(2, 1), input(3, 2)])
            .await
            .unwrap();

        let config = PackerConfig {
            target_bundle_size: 1,
            ..PackerConfig::default()
        };
        run_plan_job(&database, &prepare_queue, &config, 5_000, 500)
            .await
            .unwrap();

        assert!(database.get_new_data_items(5_000).await.unwrap().is_empty());
        assert!(!prepare_queue_concrete.is_empty());
    }

    #[tokio::test]
    async fn empty_backlog_is_a_no_op() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let prepare_queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new());

        run_plan_job(&database, &prepare_queue, &PackerConfig::default(), 5_000, 500)
            .await
            .unwrap();
    }
}
