//! The `BundlePlan` and `Bundle` entities, the latter polymorphic across the
//! `new-bundle` / `posted-bundle` / `seeded-bundle` / `permanent-bundle` /
//! `failed-bundle` lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailedReason;
use crate::ids::{BundleId, PlanId};

/// A set of data items grouped together by the plan job, correlated by `plan_id`
/// across every downstream queue message and object-store key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePlan {
    pub plan_id: PlanId,
    pub planned_date: DateTime<Utc>,
}

/// Attributes common to every bundle state once the transaction has been assembled and signed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleCore {
    pub bundle_id: BundleId,
    pub plan_id: PlanId,
    pub reward: u64,
    pub header_byte_count: u64,
    pub payload_byte_count: u64,
    pub transaction_byte_count: u64,
    pub planned_date: DateTime<Utc>,
    pub signed_date: DateTime<Utc>,
}

/// A bundle whose transaction has been signed but not yet submitted to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBundle {
    #[serde(flatten)]
    pub core: BundleCore,
}

/// A bundle accepted by the gateway as a pending transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedBundle {
    #[serde(flatten)]
    pub core: BundleCore,
    pub posted_date: DateTime<Utc>,
    pub usd_to_ar_rate: Option<f64>,
}

/// A bundle whose payload chunks have been fully uploaded to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeededBundle {
    #[serde(flatten)]
    pub core: BundleCore,
    pub posted_date: DateTime<Utc>,
    pub usd_to_ar_rate: Option<f64>,
    pub seeded_date: DateTime<Utc>,
}

/// A bundle confirmed permanent on the anchor network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentBundle {
    #[serde(flatten)]
    pub core: BundleCore,
    pub posted_date: DateTime<Utc>,
    pub usd_to_ar_rate: Option<f64>,
    pub seeded_date: DateTime<Utc>,
    pub block_height: u64,
    /// Whether this bundle has been observed indexed by the GQL gateway.
    /// Always `false` today; see `bf-jobs`'s verify job for the rationale.
    pub indexed_on_gql: bool,
}

/// A bundle that was dropped or failed to post; its data items have been repacked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBundle {
    #[serde(flatten)]
    pub core: BundleCore,
    pub failed_reason: FailedReason,
    pub failed_date: DateTime<Utc>,
}

/// Parameters needed to insert a freshly-prepared bundle (`insertNewBundle`).
#[derive(Debug, Clone)]
pub struct NewBundleAttrs {
    pub plan_id: PlanId,
    pub bundle_id: BundleId,
    pub reward: u64,
    pub header_byte_count: u64,
    pub payload_byte_count: u64,
    pub transaction_byte_count: u64,
}
