//! The seed job: uploads a posted bundle's payload to the
//! gateway as chunks, then advances it to `seeded_bundle`.

use std::sync::Arc;

use bf_capabilities::{ByteRange, Database, Gateway, ObjectStore};
use bf_types::{PipelineError, PlanId, Result};

/// Chunk size used to split the bundle payload for the gateway's chunking
/// API. 256 KiB matches the anchor network's native chunk size.
const CHUNK_SIZE: u64 = 256 * 1024;

pub async fn run_seed_job(
    plan_id: PlanId,
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    gateway: &Arc<dyn Gateway>,
) -> Result<()> {
    let posted = database.get_posted_bundle(plan_id).await?;
    let bundle_id = posted.core.bundle_id;

    if database.is_bundle_seeded(&bundle_id).await? {
        tracing::warn!(plan_id = %plan_id, bundle_id = %bundle_id, "bundle already seeded; duplicate delivery");
        return Ok(());
    }

    let head = object_store.head(&format!("bundle-payload/{plan_id}")).await?;
    let total = head.content_length;

    let mut offset = 0u64;
    while offset < total {
        let end = (offset + CHUNK_SIZE - 1).min(total.saturating_sub(1));
        let (chunk, _etag) = object_store
            .get(
                &format!("bundle-payload/{plan_id}"),
                Some(ByteRange { start: offset, end }),
            )
            .await?;
        gateway
            .post_chunk(bundle_id.as_str(), offset, chunk)
            .await
            .map_err(|e| PipelineError::Gateway(format!("post_chunk at offset {offset}: {e}")))?;
        offset = end + 1;
    }

    database.insert_seeded_bundle(bundle_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_id, FakeGateway};
    use bf_capabilities::{NewDataItemInput, PutOptions};
    use bf_storage::{MemoryDatabase, MemoryObjectStore};
    use bf_types::{BundleId, NewBundleAttrs, SignatureType, TxStatus};
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::Ordering;

    async fn planted_posted_bundle(database: &Arc<dyn Database>, object_store: &Arc<dyn ObjectStore>) -> (PlanId, BundleId) {
        let id = sample_id(5);
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
        database.insert_bundle_plan(plan_id, vec![id], 500).await.unwrap();
        let bundle_id = BundleId::new(data_encoding::BASE64URL_NOPAD.encode(&[6u8; 32])).unwrap();
        database
            .insert_new_bundle(NewBundleAttrs {
                plan_id,
                bundle_id: bundle_id.clone(),
                reward: 1,
                header_byte_count: 32,
                payload_byte_count: 4,
                transaction_byte_count: 100,
            })
            .await
            .unwrap();
        database.insert_posted_bundle(bundle_id.clone(), Some(1.0)).await.unwrap();

        object_store
            .put_bytes(&format!("bundle-payload/{plan_id}"), Bytes::from_static(b"payload"), PutOptions::default())
            .await
            .unwrap();

        (plan_id, bundle_id)
    }

    #[tokio::test]
    async fn seeds_payload_in_chunks_and_advances() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let gateway = Arc::new(FakeGateway::new(TxStatus::NotFound));
        let gateway_trait: Arc<dyn Gateway> = gateway.clone();

        let (plan_id, bundle_id) = planted_posted_bundle(&database, &object_store).await;

        run_seed_job(plan_id, &database, &object_store, &gateway_trait).await.unwrap();

        assert_eq!(gateway.chunks_posted.load(Ordering::SeqCst), 1);
        assert!(database.is_bundle_seeded(&bundle_id).await.unwrap());
    }

    #[tokio::test]
    async fn redelivery_after_the_bundle_has_advanced_past_posted_fails_cleanly() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let gateway = Arc::new(FakeGateway::new(TxStatus::NotFound));
        let gateway_trait: Arc<dyn Gateway> = gateway.clone();

        let (plan_id, _bundle_id) = planted_posted_bundle(&database, &object_store).await;

        run_seed_job(plan_id, &database, &object_store, &gateway_trait).await.unwrap();
        assert_eq!(gateway.chunks_posted.load(Ordering::SeqCst), 1);

        let result = run_seed_job(plan_id, &database, &object_store, &gateway_trait).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }
}
