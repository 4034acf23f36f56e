//! The prepare job: assembles a planned bundle's ANS-104
//! header and payload, obtains a reward quote, signs a transaction envelope,
//! and hands the bundle off to the `post-bundle` queue.

use std::sync::Arc;
use std::time::Duration;

use bf_bundle::{assemble_bundle_header, bundle_tags, header_byte_count, BundleHeaderEntry};
use bf_capabilities::{Database, Gateway, ObjectStore, PricingService, PutOptions, Queue, Wallet};
use bf_types::{BundleId, DataItemId, FailedReason, NewBundleAttrs, PipelineError, PlanId, Result};
use bytes::{Bytes, BytesMut};
use data_encoding::BASE64URL_NOPAD;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::concurrency::limited_for_each;

/// Parallelism for per-item raw-id computation.
const RAW_ID_CONCURRENCY: usize = 100;

/// Delay before restarting prepare from scratch after a blob goes missing.
const MISSING_BLOB_RESTART_DELAY: Duration = Duration::from_millis(500);

/// The bounded number of times prepare will restart itself for the same plan
/// after hitting a missing blob, before giving up and surfacing the error.
const MAX_MISSING_BLOB_RESTARTS: usize = 3;

const APP_NAME: &str = "bundle-fulfillment-pipeline";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct PostBundleMessage {
    #[serde(rename = "planId")]
    plan_id: PlanId,
}

/// A bundle transaction envelope, serialized verbatim as the object-store
/// value at `bundle/<bundleId>`.
#[derive(Serialize)]
struct StoredEnvelope {
    id: String,
    owner: String,
    last_tx: String,
    tags: Vec<(String, String)>,
    data_root: String,
    data_size: u64,
    signature: String,
    reward: u64,
    /// The chain tip height observed at signing time, used by the verify job
    /// to bound how long it waits before dropping a bundle whose transaction
    /// never appears on-chain.
    anchor_block_height: u64,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_prepare_job(
    plan_id: PlanId,
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    post_queue: &Arc<dyn Queue>,
    wallet: &Arc<dyn Wallet>,
    pricing: &Arc<dyn PricingService>,
    gateway: &Arc<dyn Gateway>,
    bundler_app_name: Option<&str>,
) -> Result<()> {
    for attempt in 0..=MAX_MISSING_BLOB_RESTARTS {
        match try_prepare_once(
            plan_id,
            database,
            object_store,
            post_queue,
            wallet,
            pricing,
            gateway,
            bundler_app_name,
        )
        .await
        {
            Ok(()) => return Ok(()),
            Err(PipelineError::MissingBlob(id)) if attempt < MAX_MISSING_BLOB_RESTARTS => {
                tracing::warn!(
                    plan_id = %plan_id,
                    data_item_id = %id,
                    attempt,
                    "blob missing from object store, restarting prepare"
                );
                tokio::time::sleep(MISSING_BLOB_RESTART_DELAY).await;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn try_prepare_once(
    plan_id: PlanId,
    database: &Arc<dyn Database>,
    object_store: &Arc<dyn ObjectStore>,
    post_queue: &Arc<dyn Queue>,
    wallet: &Arc<dyn Wallet>,
    pricing: &Arc<dyn PricingService>,
    gateway: &Arc<dyn Gateway>,
    bundler_app_name: Option<&str>,
) -> Result<()> {
    let planned = database.get_planned_data_items(plan_id).await?;
    if planned.is_empty() {
        // No planned rows left under this id: either a concurrent prepare
        // already moved the plan forward, or this is a duplicate delivery of
        // a `prepare-bundle` message whose plan has since advanced. Either
        // way there is nothing left to do here.
        tracing::warn!(plan_id = %plan_id, "prepare found no planned data items; plan likely already advanced");
        return Ok(());
    }

    let object_store_for_raw_id = Arc::clone(object_store);
    let raw_ids: Vec<Result<(DataItemId, [u8; 32])>> = limited_for_each(
        planned.clone(),
        RAW_ID_CONCURRENCY,
        move |item| {
            let object_store = Arc::clone(&object_store_for_raw_id);
            async move {
                let id = item.core.data_item_id.clone();
                let raw = if !item.core.signature.is_empty() {
                    sha256(&item.core.signature)
                } else {
                    let key = format!("raw-data-item/{id}");
                    let (bytes, _etag) = object_store.get(&key, None).await.map_err(|e| match e {
                        PipelineError::NotFound(_) => PipelineError::MissingBlob(id.to_string()),
                        other => other,
                    })?;
                    sha256(&bytes)
                };
                Ok((id, raw))
            }
        },
    )
    .await;

    let mut entries = Vec::with_capacity(raw_ids.len());
    let mut ordered_items = Vec::with_capacity(planned.len());
    let by_id: std::collections::HashMap<_, _> = planned
        .into_iter()
        .map(|item| (item.core.data_item_id.clone(), item))
        .collect();

    for result in raw_ids {
        match result {
            Ok((id, raw)) => {
                let item = by_id
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| PipelineError::Fatal(format!("missing planned item {id} after hashing")))?;
                entries.push(BundleHeaderEntry {
                    data_item_id: DataItemId::new(BASE64URL_NOPAD.encode(&raw))
                        .map_err(|e| PipelineError::Fatal(e.to_string()))?,
                    byte_count: item.core.byte_count,
                });
                ordered_items.push(item);
            }
            Err(PipelineError::MissingBlob(id)) => {
                database
                    .update_planned_data_item_as_failed(
                        DataItemId::new(id.clone()).map_err(|e| PipelineError::Fatal(e.to_string()))?,
                        FailedReason::MissingFromObjectStore,
                    )
                    .await?;
                return Err(PipelineError::MissingBlob(id));
            }
            Err(other) => return Err(other),
        }
    }

    let header = assemble_bundle_header(&entries)?;
    let header_byte_count = header_byte_count(entries.len());
    let payload_byte_count: u64 = ordered_items.iter().map(|item| item.core.byte_count).sum();

    let reward_quote = pricing
        .get_bundle_reward(header_byte_count + payload_byte_count)
        .await?;

    let mut payload = BytesMut::with_capacity((header_byte_count + payload_byte_count) as usize);
    payload.extend_from_slice(&header);
    for item in &ordered_items {
        let key = format!("raw-data-item/{}", item.core.data_item_id);
        let (bytes, _etag) = object_store
            .get(&key, None)
            .await
            .map_err(|e| match e {
                PipelineError::NotFound(_) => PipelineError::MissingBlob(item.core.data_item_id.to_string()),
                other => other,
            })?;
        payload.extend_from_slice(&bytes);
    }
    let payload = payload.freeze();

    object_store
        .put_bytes(
            &format!("bundle-payload/{plan_id}"),
            payload.clone(),
            PutOptions {
                content_type: Some("application/octet-stream".to_string()),
                content_length: Some(payload.len() as u64),
                ..Default::default()
            },
        )
        .await?;

    let data_root = BASE64URL_NOPAD.encode(&sha256(&payload));
    let data_size = payload.len() as u64;

    let mut tags = bundle_tags();
    tags.push(("App-Name".to_string(), APP_NAME.to_string()));
    tags.push(("App-Version".to_string(), APP_VERSION.to_string()));
    if let Some(name) = bundler_app_name {
        tags.push(("Bundler-App-Name".to_string(), name.to_string()));
    }

    let anchor_block_height = gateway.get_block_height().await?;
    let owner = wallet.owner().to_string();
    let last_tx = String::new();
    let message = signing_message(&owner, &last_tx, &tags, &data_root, data_size, reward_quote.reward);
    let signature_bytes = wallet.sign(&message).await?;
    let signature = BASE64URL_NOPAD.encode(&signature_bytes);
    let bundle_id = BundleId::new(BASE64URL_NOPAD.encode(&sha256(&signature_bytes)))
        .map_err(|e| PipelineError::Fatal(e.to_string()))?;

    let envelope = StoredEnvelope {
        id: bundle_id.to_string(),
        owner,
        last_tx,
        tags,
        data_root,
        data_size,
        signature,
        reward: reward_quote.reward,
        anchor_block_height,
    };
    let envelope_bytes = serde_json::to_vec(&envelope)
        .map_err(|e| PipelineError::Fatal(format!("serializing bundle envelope: {e}")))?;
    let transaction_byte_count = envelope_bytes.len() as u64;
    object_store
        .put_bytes(
            &format!("bundle/{bundle_id}"),
            Bytes::from(envelope_bytes),
            PutOptions {
                content_type: Some("application/json".to_string()),
                ..Default::default()
            },
        )
        .await?;

    let insert_result = database
        .insert_new_bundle(NewBundleAttrs {
            plan_id,
            bundle_id: bundle_id.clone(),
            reward: reward_quote.reward,
            header_byte_count,
            payload_byte_count,
            transaction_byte_count,
        })
        .await;
    match insert_result {
        Ok(()) => {}
        Err(PipelineError::BundlePlanExistsInAnotherState(msg)) => {
            tracing::warn!(plan_id = %plan_id, %msg, "plan already advanced past prepare; duplicate delivery");
            return Ok(());
        }
        Err(other) => return Err(other),
    }

    let body = serde_json::to_string(&PostBundleMessage { plan_id })
        .map_err(|e| PipelineError::Fatal(format!("serializing post-bundle message: {e}")))?;
    post_queue.send(&body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_id, FakeGateway, FakePricingService, FakeWallet};
    use bf_capabilities::{NewDataItemInput, TxStatus};
    use bf_queue::MemoryQueue;
    use bf_storage::{MemoryDatabase, MemoryObjectStore};
    use bf_types::SignatureType;
    use chrono::Utc;

    async fn planted_plan(database: &Arc<dyn Database>, object_store: &Arc<dyn ObjectStore>, id: DataItemId) -> PlanId {
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
        object_store
            .put_bytes(&format!("raw-data-item/{id}"), Bytes::from_static(b"data"), PutOptions::default())
            .await
            .unwrap();

        let plan_id = PlanId::generate();
        database
            .insert_bundle_plan(plan_id, vec![id], 500)
            .await
            .unwrap();
        plan_id
    }

    #[tokio::test]
    async fn prepares_a_plan_and_enqueues_post() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let post_queue_concrete = Arc::new(MemoryQueue::new());
        let post_queue: Arc<dyn Queue> = post_queue_concrete.clone();
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::new());
        let pricing: Arc<dyn PricingService> = Arc::new(FakePricingService::new(42));
        let gateway: Arc<dyn Gateway> = Arc::new(FakeGateway::new(TxStatus::NotFound));

        let plan_id = planted_plan(&database, &object_store, sample_id(1)).await;

        run_prepare_job(plan_id, &database, &object_store, &post_queue, &wallet, &pricing, &gateway, None)
            .await
            .unwrap();

        assert!(!post_queue_concrete.is_empty());
        let new_bundle = database.get_new_bundle(plan_id).await.unwrap();
        assert_eq!(new_bundle.core.reward, 42);

        let bundle_id = new_bundle.core.bundle_id;
        object_store.head(&format!("bundle/{bundle_id}")).await.unwrap();
        object_store.head(&format!("bundle-payload/{plan_id}")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn missing_blob_fails_the_data_item_after_retries() {
        let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let object_store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let post_queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new());
        let wallet: Arc<dyn Wallet> = Arc::new(FakeWallet::new());
        let pricing: Arc<dyn PricingService> = Arc::new(FakePricingService::new(42));
        let gateway: Arc<dyn Gateway> = Arc::new(FakeGateway::new(TxStatus::NotFound));

        let id = sample_id(2);
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
        // deliberately never stores the raw-data-item blob
        let plan_id = PlanId::generate();
        database.insert_bundle_plan(plan_id, vec![id.clone()], 500).await.unwrap();

        // The first attempt hits the missing blob and fails the data item;
        // every subsequent restart finds the plan empty and returns cleanly.
        run_prepare_job(plan_id, &database, &object_store, &post_queue, &wallet, &pricing, &gateway, None)
            .await
            .unwrap();

        let info = database.get_data_item_info(id).await.unwrap();
        assert!(matches!(info, bf_types::DataItemInfo::Failed { .. }));
    }
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// The bytes signed to produce a transaction's signature: a stable
/// concatenation of every attribute that must be bound to the signature.
fn signing_message(
    owner: &str,
    last_tx: &str,
    tags: &[(String, String)],
    data_root: &str,
    data_size: u64,
    reward: u64,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(owner.as_bytes());
    buf.extend_from_slice(last_tx.as_bytes());
    for (k, v) in tags {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf.extend_from_slice(data_root.as_bytes());
    buf.extend_from_slice(&data_size.to_le_bytes());
    buf.extend_from_slice(&reward.to_le_bytes());
    buf
}

