//! The post job: submits a prepared bundle's transaction
//! envelope to the gateway, or repacks it back to `new` if posting fails and
//! the wallet balance rules out a retry.

use std::sync::Arc;

use bf_capabilities::{Database, Gateway, ObjectStore, PricingService, Queue, TxEnvelope, Wallet};
use bf_types::{PipelineError, PlanId, Result, VerifyThresholds};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
struct StoredEnvelope {
    id: String,
    owner: String,
    last_tx: String,
    tags: Vec<(String, String)>,
    data_root: String,
    data_size: u64,
    signature: String,
    reward: u64,
}

#[derive(Serialize)]
struct SeedBundleMessage {
    #[serde(rename = "planId")]
    plan_id: PlanId,
}

/// Runs the post job once for `plan_id`: loads the `new_bundle` row and its
/// stored envelope, submits it to the gateway, and either advances to
/// `posted_bundle` or repacks the plan's data items back to `new`.
#[allow(clippy::too_many_arguments)]
pub async fn run_post_job(
    plan_id: PlanId,
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    seed_queue: &Arc<dyn Queue>,
    gateway: &Arc<dyn Gateway>,
    wallet: &Arc<dyn Wallet>,
    pricing: &Arc<dyn PricingService>,
    thresholds: &VerifyThresholds,
) -> Result<()> {
    let new_bundle = database.get_new_bundle(plan_id).await?;
    let bundle_id = new_bundle.core.bundle_id;
    let reward = new_bundle.core.reward;

    let (envelope_bytes, _etag) = object_store.get(&format!("bundle/{bundle_id}"), None).await?;
    let stored: StoredEnvelope = serde_json::from_slice(&envelope_bytes)
        .map_err(|e| PipelineError::Fatal(format!("parsing stored bundle envelope: {e}")))?;
    let envelope = TxEnvelope {
        id: stored.id,
        owner: stored.owner,
        last_tx: stored.last_tx,
        tags: stored.tags,
        data_root: stored.data_root,
        data_size: stored.data_size,
        signature: stored.signature,
        reward: stored.reward,
    };

    match gateway.post_bundle(&envelope).await {
        Ok(()) => {
            let usd_to_ar_rate = pricing.get_usd_to_ar_rate().await.ok();
            database
                .insert_posted_bundle(bundle_id.clone(), usd_to_ar_rate)
                .await?;
            let body = serde_json::to_string(&SeedBundleMessage { plan_id })
                .map_err(|e| PipelineError::Fatal(format!("serializing seed-bundle message: {e}")))?;
            seed_queue.send(&body).await
        }
        Err(post_err) => {
            let balance = gateway.get_balance(wallet.address()).await?;
            if balance < reward {
                return Err(PipelineError::PaymentInsufficient { balance, reward });
            }
            tracing::warn!(
                plan_id = %plan_id,
                bundle_id = %bundle_id,
                error = %post_err,
                "bundle post failed and will be repacked"
            );
            database
                .update_new_bundle_to_failed_to_post(
                    plan_id,
                    bundle_id,
                    thresholds.retry_limit_for_failed_data_items,
                )
                .await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_id, FakeGateway, FakePricingService, FakeWallet};
    use bf_capabilities::{NewDataItemInput, PutOptions, TxStatus};
    use bf_queue::MemoryQueue;
    use bf_storage::{MemoryDatabase, MemoryObjectStore};
    use bf_types::{BundleId, NewBundleAttrs, SignatureType};
    use bytes::Bytes;
    use chrono::Utc;

    async fn planted_new_bundle(database: &Arc<dyn Database>, object_store: &Arc<dyn ObjectStore>, reward: u64) -> PlanId {
        let id = sample_id(9);
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

        let bundle_id = BundleId::new(
            data_encoding::BASE64URL_NOPAD.encode(&[3u8; 32]),
        )
        .unwrap();
        database
            .insert_new_bundle(NewBundleAttrs {
                plan_id,
                bundle_id: bundle_id.clone(),
                reward,
                header_byte_count: 32,
                payload_byte_count: 4,
                transaction_byte_count: 100,
            })
            .await
            .unwrap();

        let envelope = serde_json::json!({
            "id": bundle_id.to_string(),
            "owner": "owner",
            "last_tx": "",
            "tags": [],
            "data_root": "root",
            "data_size": 4,
            "signature": "sig",
            "reward": reward,
        });
        object_store
            .put_bytes(
                &format!("bundle/{bundle_id}"),
                Bytes::from(serde_json::to_vec(&envelope).unwrap()),
                PutOptions::default(),
            )
            .await
            .unwrap();

        plan_id
    }

    #[tokio::test]
    async fn successful_post_advances_to_posted_and_enqueues_seed() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let seed_queue_concrete = Arc::new(MemoryQueue::new());
        let seed_queue: Arc<dyn Queue> = seed_queue_concrete.clone();
        let gateway: Arc<dyn Gateway> = Arc::new(FakeGateway::new(TxStatus::NotFound));
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::new());
        let pricing: Arc<dyn PricingService> = Arc::new(FakePricingService::new(42));
        let thresholds = VerifyThresholds::default();

        let plan_id = planted_new_bundle(&database, &object_store, 42).await;

        run_post_job(plan_id, &database, &object_store, &seed_queue, &gateway, &wallet, &pricing, &thresholds)
            .await
            .unwrap();

        database.get_posted_bundle(plan_id).await.unwrap();
        assert!(!seed_queue_concrete.is_empty());
    }

    #[tokio::test]
    async fn failed_post_with_sufficient_balance_repacks() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let seed_queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new());
        let gateway: Arc<dyn Gateway> = Arc::new(FakeGateway::failing());
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::new());
        let pricing: Arc<dyn PricingService> = Arc::new(FakePricingService::new(42));
        let thresholds = VerifyThresholds::default();

        let plan_id = planted_new_bundle(&database, &object_store, 42).await;

        run_post_job(plan_id, &database, &object_store, &seed_queue, &gateway, &wallet, &pricing, &thresholds)
            .await
            .unwrap();

        assert!(database.get_new_bundle(plan_id).await.is_err());
        assert_eq!(database.get_new_data_items(10).await.unwrap().len(), 1);
    }
}
