//! In-memory `Database` and `ObjectStore` fakes used by `bf-jobs`'s test
//! suite. These implement the same state-machine semantics as
//! `PgDatabase`/`S3ObjectStore` without a real backend, so job logic can be
//! exercised end to end in a unit test.
//!
//! A poisoned mutex means a prior call panicked mid-mutation; there is no
//! sane recovery, so these locks unwrap rather than propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use bf_capabilities::{
    ByteRange, Database, MoveOptions, MultipartUpload, NewDataItemInput, ObjectHead, ObjectStore,
    PutOptions, RepackOutcome, UploadedPart,
};
use bf_types::{
    BundleId, DataItemId, DataItemInfo, FailedDataItem, FailedReason, NewBundleAttrs, NewDataItem,
    PipelineError, PlanId, PlannedDataItem, Result, SeededBundle,
};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Default)]
struct MemoryDatabaseState {
    new_items: HashMap<DataItemId, NewDataItem>,
    planned_items: HashMap<DataItemId, PlannedDataItem>,
    permanent_items: HashMap<DataItemId, bf_types::PermanentDataItem>,
    failed_items: HashMap<DataItemId, FailedDataItem>,

    plans: HashMap<PlanId, bf_types::BundlePlan>,
    new_bundles: HashMap<BundleId, bf_types::NewBundle>,
    posted_bundles: HashMap<BundleId, bf_types::PostedBundle>,
    seeded_bundles: HashMap<BundleId, bf_types::SeededBundle>,
    permanent_bundles: HashMap<BundleId, bf_types::PermanentBundle>,
    failed_bundles: HashMap<BundleId, bf_types::FailedBundle>,
}

/// An in-memory `Database`, single-process and single-lock: every method
/// takes the whole-state mutex, so there is no genuine lock contention to
/// simulate and `FOR UPDATE NOWAIT` conflicts never occur here.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryDatabaseState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

fn input_to_new_item(item: NewDataItemInput) -> NewDataItem {
    NewDataItem {
        core: bf_types::DataItemCore {
            data_item_id: item.data_item_id,
            owner_address: item.owner_address,
            byte_count: item.byte_count,
            payload_data_start: item.payload_data_start,
            signature_type: item.signature_type,
            signature: item.signature,
            assessed_winston_price: item.assessed_winston_price,
            uploaded_date: item.uploaded_date,
            deadline_height: item.deadline_height,
            premium_feature_type: item.premium_feature_type,
            payload_content_type: item.payload_content_type,
        },
        failed_bundles: Vec::new(),
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn insert_new_data_item(&self, item: NewDataItemInput) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = item.data_item_id.clone();
        if state.new_items.contains_key(&id)
            || state.planned_items.contains_key(&id)
            || state.permanent_items.contains_key(&id)
        {
            return Err(PipelineError::DataItemExists(id.to_string()));
        }
        state.failed_items.remove(&id);
        state.new_items.insert(id, input_to_new_item(item));
        Ok(())
    }

    async fn insert_new_data_item_batch(
        &self,
        items: Vec<NewDataItemInput>,
    ) -> Result<Vec<DataItemId>> {
        let mut inserted = Vec::new();
        for item in items {
            let id = item.data_item_id.clone();
            match self.insert_new_data_item(item).await {
                Ok(()) => inserted.push(id),
                Err(PipelineError::DataItemExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    async fn get_new_data_items(&self, max_data_items_per_bundle: usize) -> Result<Vec<NewDataItem>> {
        let state = self.state.lock().unwrap();
        let mut items: Vec<NewDataItem> = state.new_items.values().cloned().collect();
        items.sort_by_key(|i| i.core.uploaded_date);
        items.truncate(max_data_items_per_bundle * 5);
        Ok(items)
    }

    async fn insert_bundle_plan(
        &self,
        plan_id: PlanId,
        data_item_ids: Vec<DataItemId>,
        _batching_size: usize,
    ) -> Result<Vec<DataItemId>> {
        let mut state = self.state.lock().unwrap();
        let planned_date = Utc::now();
        state.plans.insert(plan_id, bf_types::BundlePlan { plan_id, planned_date });

        let mut moved = Vec::new();
        for id in data_item_ids {
            if let Some(item) = state.new_items.remove(&id) {
                state.planned_items.insert(
                    id.clone(),
                    PlannedDataItem {
                        core: item.core,
                        failed_bundles: item.failed_bundles,
                        plan_id,
                        planned_date,
                    },
                );
                moved.push(id);
            }
        }

        if moved.is_empty() {
            state.plans.remove(&plan_id);
        }
        Ok(moved)
    }

    async fn get_planned_data_items(&self, plan_id: PlanId) -> Result<Vec<PlannedDataItem>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .planned_items
            .values()
            .filter(|i| i.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn insert_new_bundle(&self, attrs: NewBundleAttrs) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let plan = state
            .plans
            .remove(&attrs.plan_id)
            .ok_or_else(|| {
                let exists_elsewhere = state.new_bundles.values().any(|b| b.core.plan_id == attrs.plan_id)
                    || state.posted_bundles.values().any(|b| b.core.plan_id == attrs.plan_id)
                    || state.seeded_bundles.values().any(|b| b.core.plan_id == attrs.plan_id)
                    || state.permanent_bundles.values().any(|b| b.core.plan_id == attrs.plan_id)
                    || state.failed_bundles.values().any(|b| b.core.plan_id == attrs.plan_id);
                if exists_elsewhere {
                    PipelineError::BundlePlanExistsInAnotherState(attrs.plan_id.to_string())
                } else {
                    PipelineError::NotFound(format!("bundle_plan {}", attrs.plan_id))
                }
            })?;

        state.new_bundles.insert(
            attrs.bundle_id.clone(),
            bf_types::NewBundle {
                core: bf_types::BundleCore {
                    bundle_id: attrs.bundle_id,
                    plan_id: attrs.plan_id,
                    reward: attrs.reward,
                    header_byte_count: attrs.header_byte_count,
                    payload_byte_count: attrs.payload_byte_count,
                    transaction_byte_count: attrs.transaction_byte_count,
                    planned_date: plan.planned_date,
                    signed_date: Utc::now(),
                },
            },
        );
        Ok(())
    }

    async fn get_new_bundle(&self, plan_id: PlanId) -> Result<bf_types::NewBundle> {
        let state = self.state.lock().unwrap();
        state
            .new_bundles
            .values()
            .find(|b| b.core.plan_id == plan_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("new_bundle for plan {plan_id}")))
    }

    async fn get_posted_bundle(&self, plan_id: PlanId) -> Result<bf_types::PostedBundle> {
        let state = self.state.lock().unwrap();
        state
            .posted_bundles
            .values()
            .find(|b| b.core.plan_id == plan_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(format!("posted_bundle for plan {plan_id}")))
    }

    async fn is_bundle_seeded(&self, bundle_id: &BundleId) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.seeded_bundles.contains_key(bundle_id))
    }

    async fn insert_posted_bundle(&self, bundle_id: BundleId, usd_to_ar_rate: Option<f64>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let bundle = state
            .new_bundles
            .remove(&bundle_id)
            .ok_or_else(|| PipelineError::NotFound(format!("new_bundle {bundle_id}")))?;
        state.posted_bundles.insert(
            bundle_id,
            bf_types::PostedBundle {
                core: bundle.core,
                posted_date: Utc::now(),
                usd_to_ar_rate,
            },
        );
        Ok(())
    }

    async fn insert_seeded_bundle(&self, bundle_id: BundleId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let bundle = state
            .posted_bundles
            .remove(&bundle_id)
            .ok_or_else(|| PipelineError::NotFound(format!("posted_bundle {bundle_id}")))?;
        state.seeded_bundles.insert(
            bundle_id,
            SeededBundle {
                core: bundle.core,
                posted_date: bundle.posted_date,
                usd_to_ar_rate: bundle.usd_to_ar_rate,
                seeded_date: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_seeded_bundles(&self, limit: usize) -> Result<Vec<SeededBundle>> {
        let state = self.state.lock().unwrap();
        let mut bundles: Vec<SeededBundle> = state.seeded_bundles.values().cloned().collect();
        bundles.sort_by_key(|b| b.posted_date);
        bundles.truncate(limit);
        Ok(bundles)
    }

    async fn update_bundle_as_permanent(
        &self,
        plan_id: PlanId,
        block_height: u64,
        indexed_on_gql: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let bundle_id = state
            .seeded_bundles
            .values()
            .find(|b| b.core.plan_id == plan_id)
            .map(|b| b.core.bundle_id.clone())
            .ok_or_else(|| PipelineError::NotFound(format!("seeded_bundle for plan {plan_id}")))?;
        let bundle = state.seeded_bundles.remove(&bundle_id).unwrap();
        state.permanent_bundles.insert(
            bundle_id,
            bf_types::PermanentBundle {
                core: bundle.core,
                posted_date: bundle.posted_date,
                usd_to_ar_rate: bundle.usd_to_ar_rate,
                seeded_date: bundle.seeded_date,
                block_height,
                indexed_on_gql,
            },
        );
        Ok(())
    }

    async fn update_data_items_as_permanent(
        &self,
        data_item_ids: Vec<DataItemId>,
        block_height: u64,
        bundle_id: BundleId,
        _batching_size: usize,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in data_item_ids {
            if let Some(item) = state.planned_items.remove(&id) {
                state.permanent_items.insert(
                    id,
                    bf_types::PermanentDataItem {
                        data_item_id: item.core.data_item_id,
                        owner_address: item.core.owner_address,
                        byte_count: item.core.byte_count,
                        payload_data_start: item.core.payload_data_start,
                        signature_type: item.core.signature_type,
                        assessed_winston_price: item.core.assessed_winston_price,
                        uploaded_date: item.core.uploaded_date,
                        deadline_height: item.core.deadline_height,
                        premium_feature_type: item.core.premium_feature_type,
                        payload_content_type: item.core.payload_content_type,
                        block_height,
                        bundle_id: bundle_id.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_data_items_to_be_repacked(
        &self,
        data_item_ids: Vec<DataItemId>,
        failed_bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let mut state = self.state.lock().unwrap();
        let mut outcome = RepackOutcome::default();
        for id in data_item_ids {
            let Some(mut item) = state.planned_items.remove(&id) else {
                continue;
            };
            item.failed_bundles.push(failed_bundle_id.clone());
            if item.failed_bundles.len() >= retry_limit {
                state.failed_items.insert(
                    id.clone(),
                    FailedDataItem {
                        core: item.core,
                        failed_bundles: item.failed_bundles,
                        failed_reason: FailedReason::TooManyFailures,
                        failed_date: Utc::now(),
                    },
                );
                outcome.failed.push(id);
            } else {
                state.new_items.insert(
                    id.clone(),
                    NewDataItem {
                        core: item.core,
                        failed_bundles: item.failed_bundles,
                    },
                );
                outcome.repacked.push(id);
            }
        }
        Ok(outcome)
    }

    async fn update_seeded_bundle_to_dropped(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let ids: Vec<DataItemId> = self
            .get_planned_data_items(plan_id)
            .await?
            .into_iter()
            .map(|i| i.core.data_item_id)
            .collect();
        let outcome = self
            .update_data_items_to_be_repacked(ids, bundle_id.clone(), retry_limit)
            .await?;

        let mut state = self.state.lock().unwrap();
        if let Some(bundle) = state.seeded_bundles.remove(&bundle_id) {
            state.failed_bundles.insert(
                bundle_id,
                bf_types::FailedBundle {
                    core: bundle.core,
                    failed_reason: FailedReason::NotFound,
                    failed_date: Utc::now(),
                },
            );
        }
        Ok(outcome)
    }

    async fn update_new_bundle_to_failed_to_post(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome> {
        let ids: Vec<DataItemId> = self
            .get_planned_data_items(plan_id)
            .await?
            .into_iter()
            .map(|i| i.core.data_item_id)
            .collect();
        let outcome = self
            .update_data_items_to_be_repacked(ids, bundle_id.clone(), retry_limit)
            .await?;

        let mut state = self.state.lock().unwrap();
        if let Some(bundle) = state.new_bundles.remove(&bundle_id) {
            state.failed_bundles.insert(
                bundle_id,
                bf_types::FailedBundle {
                    core: bundle.core,
                    failed_reason: FailedReason::FailedToPost,
                    failed_date: Utc::now(),
                },
            );
        }
        Ok(outcome)
    }

    async fn update_planned_data_item_as_failed(
        &self,
        data_item_id: DataItemId,
        failed_reason: FailedReason,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let item = state
            .planned_items
            .remove(&data_item_id)
            .ok_or_else(|| PipelineError::NotFound(format!("planned_data_item {data_item_id}")))?;
        state.failed_items.insert(
            data_item_id,
            FailedDataItem {
                core: item.core,
                failed_bundles: item.failed_bundles,
                failed_reason,
                failed_date: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_data_item_info(&self, data_item_id: DataItemId) -> Result<DataItemInfo> {
        let state = self.state.lock().unwrap();
        if let Some(item) = state.new_items.get(&data_item_id) {
            return Ok(DataItemInfo::New {
                assessed_winston_price: item.core.assessed_winston_price,
                uploaded_date: item.core.uploaded_date,
            });
        }
        if let Some(item) = state.planned_items.get(&data_item_id) {
            return Ok(DataItemInfo::Planned {
                assessed_winston_price: item.core.assessed_winston_price,
                uploaded_date: item.core.uploaded_date,
                plan_id: item.plan_id,
            });
        }
        if let Some(item) = state.permanent_items.get(&data_item_id) {
            return Ok(DataItemInfo::Permanent {
                assessed_winston_price: item.assessed_winston_price,
                uploaded_date: item.uploaded_date,
                bundle_id: item.bundle_id.clone(),
                block_height: item.block_height,
                deadline_height: item.deadline_height,
            });
        }
        if let Some(item) = state.failed_items.get(&data_item_id) {
            return Ok(DataItemInfo::Failed {
                assessed_winston_price: item.core.assessed_winston_price,
                uploaded_date: item.core.uploaded_date,
                failed_reason: item.failed_reason,
            });
        }
        Err(PipelineError::NotFound(format!("data item {data_item_id}")))
    }
}

/// An in-memory `ObjectStore` backed by a plain map. No partial-write
/// behavior to simulate, so `put` always succeeds or the whole call fails.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (Bytes, HashMap<String, String>, Option<String>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        mut body: Box<dyn AsyncRead + Send + Sync + Unpin>,
        opts: PutOptions,
    ) -> Result<()> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)
            .await
            .map_err(|e| PipelineError::Fatal(format!("reading put body for {key}: {e}")))?;
        self.put_bytes(key, Bytes::from(buf), opts).await
    }

    async fn put_bytes(&self, key: &str, body: Bytes, opts: PutOptions) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, opts.metadata, opts.content_type));
        Ok(())
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> Result<(Bytes, String)> {
        let objects = self.objects.lock().unwrap();
        let (bytes, _, _) = objects
            .get(key)
            .ok_or_else(|| PipelineError::MissingBlob(key.to_string()))?;
        let bytes = match range {
            Some(r) => bytes.slice(r.start as usize..=(r.end as usize).min(bytes.len().saturating_sub(1))),
            None => bytes.clone(),
        };
        Ok((bytes, format!("{:x}", md5_like(key))))
    }

    async fn head(&self, key: &str) -> Result<ObjectHead> {
        let objects = self.objects.lock().unwrap();
        let (bytes, metadata, content_type) = objects
            .get(key)
            .ok_or_else(|| PipelineError::MissingBlob(key.to_string()))?;
        Ok(ObjectHead {
            etag: format!("{:x}", md5_like(key)),
            content_length: bytes.len() as u64,
            content_type: content_type.clone(),
            metadata: metadata.clone(),
        })
    }

    async fn move_object(&self, src: &str, dst: &str, _opts: MoveOptions) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let value = objects
            .remove(src)
            .ok_or_else(|| PipelineError::MissingBlob(src.to_string()))?;
        objects.insert(dst.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, _opts: PutOptions) -> Result<MultipartUpload> {
        Ok(MultipartUpload {
            upload_id: format!("memory-upload-{key}"),
            key: key.to_string(),
        })
    }

    async fn upload_part(
        &self,
        _upload: &MultipartUpload,
        part_number: i32,
        body: Bytes,
    ) -> Result<UploadedPart> {
        Ok(UploadedPart {
            part_number,
            etag: format!("{:x}", body.len()),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _upload: &MultipartUpload,
        _parts: Vec<UploadedPart>,
    ) -> Result<()> {
        Ok(())
    }

    async fn list_parts(&self, _upload: &MultipartUpload) -> Result<Vec<UploadedPart>> {
        Ok(Vec::new())
    }
}

fn md5_like(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}
