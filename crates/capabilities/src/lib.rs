#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! Capability traits consumed by every job: `Database`, `ObjectStore`,
//! `Queue`, `Gateway`, `Wallet`, `PricingService`, and `CacheService`.
//!
//! Every job takes these as explicit `Arc<dyn Trait>` dependencies rather than
//! reaching for a global, so unit tests can swap in in-memory fakes
//! (`bf-storage`'s `test-support` feature) without touching real
//! infrastructure.

pub mod cache;
pub mod database;
pub mod gateway;
pub mod object_store;
pub mod pricing;
pub mod queue;
pub mod wallet;

pub use cache::CacheService;
pub use database::{Database, NewDataItemInput, RepackOutcome};
pub use gateway::{Gateway, TxEnvelope, TxStatus};
pub use object_store::{
    ByteRange, MoveOptions, MultipartUpload, ObjectHead, ObjectStore, PutOptions, UploadedPart,
};
pub use pricing::{BundleReward, PricingService};
pub use queue::{Message, Queue, QueueConfig};
pub use wallet::Wallet;
