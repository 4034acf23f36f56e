//! The error taxonomy shared by every capability trait and job in the pipeline.
//!
//! Each variant corresponds to one of the error kinds enumerated by the
//! pipeline's error handling design: lock contention, missing rows, duplicate
//! inserts, missing blobs, cross-state races, insufficient balance, gateway
//! failures, the verify job's "still pending" sentinel, and an escape hatch
//! for anything unrecognized.

use thiserror::Error;

/// Assigns a stable, machine-readable string code to an error variant.
///
/// The code is used as a metrics label and in structured log fields; it must
/// never change for a given variant once released; renaming a variant is not
/// the same as renaming its code.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// The reason a data item or bundle was moved to a `failed-*` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedReason {
    /// The item's `failedBundles` list reached `retryLimitForFailedDataItems`.
    TooManyFailures,
    /// The raw data item bytes were absent from object storage during prepare.
    MissingFromObjectStore,
    /// A seeded bundle's transaction was not found on-chain past the drop threshold.
    NotFound,
    /// The post job could not submit the bundle transaction to the gateway.
    FailedToPost,
}

impl std::fmt::Display for FailedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailedReason::TooManyFailures => "too_many_failures",
            FailedReason::MissingFromObjectStore => "missing_from_object_store",
            FailedReason::NotFound => "not_found",
            FailedReason::FailedToPost => "failed_to_post",
        };
        f.write_str(s)
    }
}

/// Unified error type returned by every capability implementation and job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A row was contended by another worker (`FOR UPDATE NOWAIT` conflict).
    /// Policy: skip gracefully; the message or tick will be retried later.
    #[error("row locked by another worker: {0}")]
    LockConflict(String),

    /// An expected row was absent (plan gone, bundle in an unexpected state).
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique-key collision on insert; treated as an idempotent accept on re-ingest.
    #[error("data item already exists: {0}")]
    DataItemExists(String),

    /// `NoSuchKey` on `raw-data-item/<id>` during prepare.
    #[error("blob missing from object store: {0}")]
    MissingBlob(String),

    /// Prepare detected the plan already moved forward (duplicate delivery).
    #[error("bundle plan {0} already exists in another state")]
    BundlePlanExistsInAnotherState(String),

    /// The signing wallet's balance is below the bundle's reward.
    #[error("wallet balance {balance} below required reward {reward}")]
    PaymentInsufficient {
        /// The wallet's balance in winston at the time of the check.
        balance: u64,
        /// The bundle's assessed reward in winston.
        reward: u64,
    },

    /// A transient or persistent error from the anchor-network gateway.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Verify sentinel: some of a bundle's data items have not accumulated
    /// enough confirmations to be safely repacked yet. Do not advance the
    /// bundle to permanent this tick.
    #[error("data items still pending: {0}")]
    DataItemsStillPending(String),

    /// Unrecognized database or programming error.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ErrorCode for PipelineError {
    fn code(&self) -> &'static str {
        match self {
            PipelineError::LockConflict(_) => "LOCK_CONFLICT",
            PipelineError::NotFound(_) => "NOT_FOUND",
            PipelineError::DataItemExists(_) => "DATA_ITEM_EXISTS",
            PipelineError::MissingBlob(_) => "MISSING_BLOB",
            PipelineError::BundlePlanExistsInAnotherState(_) => "BUNDLE_PLAN_EXISTS_ELSEWHERE",
            PipelineError::PaymentInsufficient { .. } => "PAYMENT_INSUFFICIENT",
            PipelineError::Gateway(_) => "GATEWAY_ERROR",
            PipelineError::DataItemsStillPending(_) => "DATA_ITEMS_STILL_PENDING",
            PipelineError::Fatal(_) => "FATAL",
        }
    }
}

impl PipelineError {
    /// True for errors whose policy is "skip gracefully, don't alarm" — a
    /// lock conflict or a duplicate-delivery `NotFound`/`BundlePlanExistsInAnotherState`.
    pub fn is_soft_skip(&self) -> bool {
        matches!(
            self,
            PipelineError::LockConflict(_) | PipelineError::BundlePlanExistsInAnotherState(_)
        )
    }
}

/// Convenience alias used throughout the pipeline crates.
pub type Result<T> = std::result::Result<T, PipelineError>;
