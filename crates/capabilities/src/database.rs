//! The `Database` capability: the transactional state store enforcing the
//! data-item and bundle lifecycle invariants.

use async_trait::async_trait;
use bf_types::{
    BundleId, DataItemId, DataItemInfo, FailedReason, NewBundle, NewBundleAttrs, NewDataItem,
    PlanId, PlannedDataItem, Result, SeededBundle,
};
use chrono::{DateTime, Utc};

/// A data item as submitted by ingress, before any pipeline bookkeeping
/// (`failedBundles`, `plan_id`) has been attached.
#[derive(Debug, Clone)]
pub struct NewDataItemInput {
    pub data_item_id: DataItemId,
    pub owner_address: String,
    pub byte_count: u64,
    pub payload_data_start: u64,
    pub signature_type: bf_types::SignatureType,
    pub signature: Vec<u8>,
    pub assessed_winston_price: u64,
    pub uploaded_date: DateTime<Utc>,
    pub deadline_height: Option<u64>,
    pub premium_feature_type: Option<String>,
    pub payload_content_type: Option<String>,
}

/// Outcome of `update_data_items_as_permanent` / `update_data_items_to_be_repacked`
/// style batch operations, used by callers (the verify job) to decide whether to
/// continue or to raise `DataItemsStillPending` for the enclosing bundle.
#[derive(Debug, Clone, Default)]
pub struct RepackOutcome {
    /// Data item ids moved back to `new` for a future plan.
    pub repacked: Vec<DataItemId>,
    /// Data item ids moved to `failed` because they hit the retry limit.
    pub failed: Vec<DataItemId>,
}

/// The transactional state store behind the bundle lifecycle state machine.
///
/// Every mutating method performs its transition inside a single database
/// transaction acquiring `FOR UPDATE NOWAIT` on the rows it intends to move;
/// a lock conflict with another worker surfaces as
/// `PipelineError::LockConflict`, never as a panic or a silent no-op.
#[async_trait]
pub trait Database: Send + Sync {
    /// Inserts a brand-new data item. Fails with `DataItemExists` if the id is
    /// already present in any of the four state tables.
    async fn insert_new_data_item(&self, item: NewDataItemInput) -> Result<()>;

    /// Batch variant of `insert_new_data_item`: items already present as
    /// `new`/`planned`/`permanent` are silently filtered out; items present as
    /// `failed` are deleted and re-inserted as `new` (an explicit retry).
    /// Returns the ids that were actually (re-)inserted.
    async fn insert_new_data_item_batch(
        &self,
        items: Vec<NewDataItemInput>,
    ) -> Result<Vec<DataItemId>>;

    /// Selects up to `5 * max_data_items_per_bundle` new data items ordered by
    /// `uploaded_date`, locked `FOR UPDATE NOWAIT` for the duration of the
    /// query. Returns empty (not an error) if another planner holds the lock.
    async fn get_new_data_items(&self, max_data_items_per_bundle: usize) -> Result<Vec<NewDataItem>>;

    /// Moves `data_item_ids` from `new` into `planned` under `plan_id`, in
    /// batches of `batching_size`. Ids already moved or locked by another
    /// worker are silently skipped. If nothing ends up planned, the
    /// `bundle_plan` row is deleted so no downstream worker ever sees an
    /// empty plan.
    async fn insert_bundle_plan(
        &self,
        plan_id: PlanId,
        data_item_ids: Vec<DataItemId>,
        batching_size: usize,
    ) -> Result<Vec<DataItemId>>;

    /// Fetches the `PlannedDataItem` rows currently under `plan_id`.
    async fn get_planned_data_items(&self, plan_id: PlanId) -> Result<Vec<PlannedDataItem>>;

    /// Moves a `bundle_plan` row into `new_bundle`. Fails with
    /// `BundlePlanExistsInAnotherState` if the plan has already advanced, or
    /// `NotFound` if the plan id is unknown in any state.
    async fn insert_new_bundle(&self, attrs: NewBundleAttrs) -> Result<()>;

    /// Fetches the `new_bundle` row for `plan_id`, used by the post job to
    /// recover the bundle id and reward from a `{planId}` queue message.
    async fn get_new_bundle(&self, plan_id: PlanId) -> Result<NewBundle>;

    /// Moves a bundle from `new_bundle` to `posted_bundle`, stamping `posted_date = now`.
    async fn insert_posted_bundle(&self, bundle_id: BundleId, usd_to_ar_rate: Option<f64>) -> Result<()>;

    /// Fetches the `posted_bundle` row for `plan_id`, used by the seed job to
    /// recover the bundle id from a `{planId}` queue message. Returns
    /// `NotFound` both when the plan is unknown and when it has already
    /// advanced to `seeded_bundle`; callers distinguish the latter with
    /// `is_bundle_seeded`.
    async fn get_posted_bundle(&self, plan_id: PlanId) -> Result<bf_types::PostedBundle>;

    /// True if `bundle_id` is already present in `seeded_bundle` (duplicate
    /// delivery of a `seed-bundle` message).
    async fn is_bundle_seeded(&self, bundle_id: &BundleId) -> Result<bool>;

    /// Moves a bundle from `posted_bundle` to `seeded_bundle`, stamping `seeded_date = now`.
    async fn insert_seeded_bundle(&self, bundle_id: BundleId) -> Result<()>;

    /// Lists up to `limit` seeded bundles ordered by `posted_date`, locked
    /// `FOR UPDATE NOWAIT`. Returns empty on lock conflict.
    async fn get_seeded_bundles(&self, limit: usize) -> Result<Vec<SeededBundle>>;

    /// Moves a bundle from `seeded_bundle` to `permanent_bundle`.
    async fn update_bundle_as_permanent(
        &self,
        plan_id: PlanId,
        block_height: u64,
        indexed_on_gql: bool,
    ) -> Result<()>;

    /// Moves the given planned data items to `permanent`, dropping their
    /// `signature` column, in batches of at most `batching_size`.
    async fn update_data_items_as_permanent(
        &self,
        data_item_ids: Vec<DataItemId>,
        block_height: u64,
        bundle_id: BundleId,
        batching_size: usize,
    ) -> Result<()>;

    /// Moves planned data items back to `new` (appending `failed_bundle_id` to
    /// their `failedBundles`), or to `failed` (reason `too_many_failures`) if
    /// doing so would exceed `retry_limit`.
    async fn update_data_items_to_be_repacked(
        &self,
        data_item_ids: Vec<DataItemId>,
        failed_bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome>;

    /// Repacks every planned item under `plan_id`, then moves the seeded
    /// bundle to `failed_bundle` with reason `not_found`.
    async fn update_seeded_bundle_to_dropped(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome>;

    /// Repacks every planned item under `plan_id`, then moves the new bundle
    /// to `failed_bundle` with reason `failed_to_post`.
    async fn update_new_bundle_to_failed_to_post(
        &self,
        plan_id: PlanId,
        bundle_id: BundleId,
        retry_limit: usize,
    ) -> Result<RepackOutcome>;

    /// Moves a single planned data item to `failed` with the given reason.
    async fn update_planned_data_item_as_failed(
        &self,
        data_item_id: DataItemId,
        failed_reason: FailedReason,
    ) -> Result<()>;

    /// Read-only probe across all four data-item tables.
    async fn get_data_item_info(&self, data_item_id: DataItemId) -> Result<DataItemInfo>;
}
