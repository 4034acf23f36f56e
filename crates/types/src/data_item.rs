//! The `DataItem` entity, polymorphic across the `new` / `planned` /
//! `permanent` / `failed` lifecycle states described in the data model.
//!
//! Each state is modeled as its own struct rather than one struct with a
//! status field, because each state is a distinct table/partition: a single
//! SQL statement both asserts the source state and performs the transition,
//! and the type system should make it impossible to, say, hand a
//! `PermanentDataItem` to code that expects something still awaiting a plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailedReason;
use crate::ids::{BundleId, DataItemId, PlanId};

/// The ANS-104 signature scheme used to sign a data item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    Arweave,
    Ed25519,
    Ethereum,
    Solana,
    InjectedAptos,
    MultiAptos,
    TypedEthereum,
}

/// Attributes shared by a data item in every lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItemCore {
    pub data_item_id: DataItemId,
    pub owner_address: String,
    pub byte_count: u64,
    pub payload_data_start: u64,
    pub signature_type: SignatureType,
    #[serde(with = "serde_bytes_base64")]
    pub signature: Vec<u8>,
    pub assessed_winston_price: u64,
    pub uploaded_date: DateTime<Utc>,
    pub deadline_height: Option<u64>,
    pub premium_feature_type: Option<String>,
    pub payload_content_type: Option<String>,
}

/// A data item awaiting its first plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataItem {
    #[serde(flatten)]
    pub core: DataItemCore,
    /// Bundles this item was previously placed in that subsequently failed.
    pub failed_bundles: Vec<BundleId>,
}

/// A data item that has been placed in a `BundlePlan` awaiting prepare/post/seed/verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedDataItem {
    #[serde(flatten)]
    pub core: DataItemCore,
    pub failed_bundles: Vec<BundleId>,
    pub plan_id: PlanId,
    pub planned_date: DateTime<Utc>,
}

/// A data item whose enclosing bundle reached permanent confirmation.
/// The `signature` column is dropped on this transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermanentDataItem {
    pub data_item_id: DataItemId,
    pub owner_address: String,
    pub byte_count: u64,
    pub payload_data_start: u64,
    pub signature_type: SignatureType,
    pub assessed_winston_price: u64,
    pub uploaded_date: DateTime<Utc>,
    pub deadline_height: Option<u64>,
    pub premium_feature_type: Option<String>,
    pub payload_content_type: Option<String>,
    pub block_height: u64,
    pub bundle_id: BundleId,
}

/// A data item that exhausted its retry budget or is otherwise unrecoverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDataItem {
    #[serde(flatten)]
    pub core: DataItemCore,
    pub failed_bundles: Vec<BundleId>,
    pub failed_reason: FailedReason,
    pub failed_date: DateTime<Utc>,
}

/// The status returned by a read-only probe across all four data-item tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DataItemInfo {
    New {
        assessed_winston_price: u64,
        uploaded_date: DateTime<Utc>,
    },
    Planned {
        assessed_winston_price: u64,
        uploaded_date: DateTime<Utc>,
        plan_id: PlanId,
    },
    Permanent {
        assessed_winston_price: u64,
        uploaded_date: DateTime<Utc>,
        bundle_id: BundleId,
        block_height: u64,
        deadline_height: Option<u64>,
    },
    Failed {
        assessed_winston_price: u64,
        uploaded_date: DateTime<Utc>,
        failed_reason: FailedReason,
    },
}

mod serde_bytes_base64 {
    use data_encoding::BASE64URL_NOPAD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64URL_NOPAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        BASE64URL_NOPAD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
