#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! Concrete infrastructure backends: Postgres (`Database`), S3
//! (`ObjectStore`), an in-process cache, and (behind `test-support`)
//! in-memory fakes of `Database`/`ObjectStore` for job-level tests.

pub mod backup;
pub mod cache;
pub mod postgres;
pub mod s3;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use backup::BackupObjectStore;
pub use cache::InProcessCache;
pub use postgres::PgDatabase;
pub use s3::S3ObjectStore;

#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryDatabase, MemoryObjectStore};
