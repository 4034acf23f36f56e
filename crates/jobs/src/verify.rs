//! The verify job: polls the gateway for each seeded
//! bundle's on-chain status, advancing confirmed data items to permanent,
//! repacking stragglers, and dropping bundles that never land.

use std::collections::HashSet;
use std::sync::Arc;

use bf_capabilities::{ByteRange, Database, Gateway, ObjectStore, TxStatus};
use bf_types::{BundleId, DataItemId, PipelineError, PlanId, Result, VerifyThresholds};
use serde::Deserialize;

use crate::concurrency::limited_for_each;

const SEEDED_BUNDLE_LIMIT: usize = 50;

/// Concurrency for the per-batch permanent/repack update fan-out.
const BATCH_UPDATE_CONCURRENCY: usize = 10;

#[derive(Deserialize)]
struct StoredEnvelope {
    anchor_block_height: u64,
}

/// Runs one verify tick: checks every currently seeded bundle and advances,
/// repacks, or drops it according to its on-chain status.
pub async fn run_verify_job(
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    gateway: &Arc<dyn Gateway>,
    thresholds: &VerifyThresholds,
    batching_size: usize,
) -> Result<()> {
    let seeded = database.get_seeded_bundles(SEEDED_BUNDLE_LIMIT).await?;
    for bundle in seeded {
        if let Err(err) = verify_one_bundle(
            bundle.core.plan_id,
            bundle.core.bundle_id,
            bundle.core.header_byte_count,
            database,
            object_store,
            gateway,
            thresholds,
            batching_size,
        )
        .await
        {
            if err.is_soft_skip() || matches!(err, PipelineError::DataItemsStillPending(_)) {
                tracing::debug!(error = %err, "skipping bundle this verify tick");
            } else {
                tracing::warn!(error = %err, "verify failed for a bundle, continuing with the rest");
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn verify_one_bundle(
    plan_id: PlanId,
    bundle_id: BundleId,
    header_byte_count: u64,
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    gateway: &Arc<dyn Gateway>,
    thresholds: &VerifyThresholds,
    batching_size: usize,
) -> Result<()> {
    let status = gateway.get_tx_status(bundle_id.as_str()).await?;

    let (confirmations, block_height) = match status {
        TxStatus::NotFound => {
            let (envelope_bytes, _etag) = object_store.get(&format!("bundle/{bundle_id}"), None).await?;
            let stored: StoredEnvelope = serde_json::from_slice(&envelope_bytes)
                .map_err(|e| PipelineError::Fatal(format!("parsing stored bundle envelope: {e}")))?;
            let tip = gateway.get_block_height().await?;
            if tip.saturating_sub(stored.anchor_block_height) > thresholds.drop_bundle_tx_threshold_blocks {
                database
                    .update_seeded_bundle_to_dropped(
                        plan_id,
                        bundle_id,
                        thresholds.retry_limit_for_failed_data_items,
                    )
                    .await?;
            }
            return Ok(());
        }
        TxStatus::Confirmed {
            confirmations,
            block_height,
        } => (confirmations, block_height),
    };

    if confirmations < thresholds.tx_permanent_threshold {
        return Ok(());
    }

    let (header_bytes, _etag) = object_store
        .get(
            &format!("bundle-payload/{plan_id}"),
            Some(ByteRange {
                start: 0,
                end: header_byte_count.saturating_sub(1),
            }),
        )
        .await?;
    let header_ids: HashSet<DataItemId> = bf_bundle::bundle_header_info_from_buffer(&header_bytes)?
        .into_iter()
        .map(|entry| entry.data_item_id)
        .collect();

    let planned = database.get_planned_data_items(plan_id).await?;
    let (in_header, not_in_header): (Vec<_>, Vec<_>) = planned
        .into_iter()
        .partition(|item| header_ids.contains(&item.core.data_item_id));

    let mut any_still_pending = false;

    for batch in in_header.chunks(batching_size) {
        let ids: Vec<DataItemId> = batch.iter().map(|i| i.core.data_item_id.clone()).collect();
        database
            .update_data_items_as_permanent(ids, block_height, bundle_id.clone(), batching_size)
            .await?;
    }

    let repack_threshold = repack_confirmation_threshold(header_byte_count, thresholds.tx_permanent_threshold);
    let batches: Vec<Vec<DataItemId>> = not_in_header
        .chunks(batching_size)
        .map(|batch| batch.iter().map(|i| i.core.data_item_id.clone()).collect())
        .collect();

    let database_for_batches = Arc::clone(database);
    let bundle_id_for_batches = bundle_id.clone();
    let retry_limit = thresholds.retry_limit_for_failed_data_items;
    let results = limited_for_each(batches, BATCH_UPDATE_CONCURRENCY, move |ids| {
        let database = Arc::clone(&database_for_batches);
        let bundle_id = bundle_id_for_batches.clone();
        async move {
            if confirmations < repack_threshold {
                Err(PipelineError::DataItemsStillPending(format!(
                    "bundle {bundle_id} has {confirmations} confirmations, repack threshold is {repack_threshold}"
                )))
            } else {
                database
                    .update_data_items_to_be_repacked(ids, bundle_id, retry_limit)
                    .await
                    .map(|_| ())
            }
        }
    })
    .await;

    for result in results {
        match result {
            Ok(()) => {}
            Err(PipelineError::DataItemsStillPending(_)) => any_still_pending = true,
            Err(other) => return Err(other),
        }
    }

    if any_still_pending {
        return Err(PipelineError::DataItemsStillPending(format!(
            "bundle {bundle_id} has data items awaiting more confirmations before repack"
        )));
    }

    database
        .update_bundle_as_permanent(plan_id, block_height, false)
        .await
}

/// Larger bundles tolerate more confirmations before their stragglers are
/// repacked, since a larger bundle represents more at-risk work to redo.
fn repack_confirmation_threshold(header_byte_count: u64, base_threshold: u64) -> u64 {
    let size_factor = (header_byte_count / (64 * 1024)).min(base_threshold);
    base_threshold + size_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_id, FakeGateway};
    use bf_bundle::{assemble_bundle_header, header_byte_count as header_len, BundleHeaderEntry};
    use bf_capabilities::{NewDataItemInput, PutOptions};
    use bf_storage::{MemoryDatabase, MemoryObjectStore};
    use bf_types::{DataItemInfo, NewBundleAttrs, SignatureType};
    use bytes::Bytes;
    use chrono::Utc;

    #[test]
    fn repack_threshold_grows_with_bundle_size() {
        assert_eq!(repack_confirmation_threshold(0, 50), 50);
        assert!(repack_confirmation_threshold(10 * 1024 * 1024, 50) > 50);
    }

    async fn planted_seeded_bundle(
        database: &Arc<dyn Database>,
        object_store: &Arc<dyn ObjectStore>,
        anchor_block_height: u64,
    ) -> (PlanId, BundleId, DataItemId) {
        let id = sample_id(11);
        database
            .insert_new_data_item(NewDataItemInput {
                data_item_id: id.clone(),
                owner_address: "owner".to_string(),
                byte_count: 4,
                payload_data_start: 0,
                signature_type: SignatureType::Arweave,
                signature: Vec::new(),
                assessed_winston_price: 10,
                uploaded_date: Utc::now(),
                deadline_height: None,
                premium_feature_type: None,
                payload_content_type: None,
            })
            .await
            .unwrap();
        let plan_id = PlanId::generate();
        database.insert_bundle_plan(plan_id, vec![id.clone()], 500).await.unwrap();

        let header = assemble_bundle_header(&[BundleHeaderEntry {
            data_item_id: id.clone(),
            byte_count: 4,
        }])
        .unwrap();
        let header_byte_count = header_len(1);

        let bundle_id = BundleId::new(data_encoding::BASE64URL_NOPAD.encode(&[12u8; 32])).unwrap();
        database
            .insert_new_bundle(NewBundleAttrs {
                plan_id,
                bundle_id: bundle_id.clone(),
                reward: 1,
                header_byte_count,
                payload_byte_count: 4,
                transaction_byte_count: 100,
            })
            .await
            .unwrap();
        database.insert_posted_bundle(bundle_id.clone(), Some(1.0)).await.unwrap();
        database.insert_seeded_bundle(bundle_id.clone()).await.unwrap();

        object_store
            .put_bytes(&format!("bundle-payload/{plan_id}"), header, PutOptions::default())
            .await
            .unwrap();
        let envelope = serde_json::json!({ "anchor_block_height": anchor_block_height });
        object_store
            .put_bytes(
                &format!("bundle/{bundle_id}"),
                Bytes::from(serde_json::to_vec(&envelope).unwrap()),
                PutOptions::default(),
            )
            .await
            .unwrap();

        (plan_id, bundle_id, id)
    }

    #[tokio::test]
    async fn confirmed_bundle_advances_its_data_items_to_permanent() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let gateway: Arc<dyn Gateway> = Arc::new(FakeGateway::new(TxStatus::Confirmed {
            confirmations: 1_000,
            block_height: 500,
        }));
        let thresholds = VerifyThresholds::default();

        let (_plan_id, bundle_id, id) = planted_seeded_bundle(&database, &object_store, 0).await;

        run_verify_job(&database, &object_store, &gateway, &thresholds, 500)
            .await
            .unwrap();

        let info = database.get_data_item_info(id).await.unwrap();
        assert!(matches!(info, DataItemInfo::Permanent { .. }));
        assert!(database.get_seeded_bundles(10).await.unwrap().iter().all(|b| b.core.bundle_id != bundle_id));
    }

    #[tokio::test]
    async fn bundle_past_the_drop_threshold_is_dropped_and_repacked() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let gateway = Arc::new(FakeGateway::new(TxStatus::NotFound));
        gateway.chunks_posted.store(0, std::sync::atomic::Ordering::SeqCst);
        let gateway_trait: Arc<dyn Gateway> = gateway.clone();
        let thresholds = VerifyThresholds::default();

        // Anchor height far enough behind the fake gateway's tip (100) to
        // exceed `drop_bundle_tx_threshold_blocks` (50).
        let (_plan_id, _bundle_id, id) = planted_seeded_bundle(&database, &object_store, 0).await;

        run_verify_job(&database, &object_store, &gateway_trait, &thresholds, 500)
            .await
            .unwrap();

        let info = database.get_data_item_info(id).await.unwrap();
        assert!(matches!(info, DataItemInfo::New { .. }));
    }
}
