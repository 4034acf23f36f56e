#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! SQS-backed `Queue`, a visibility-timeout heartbeat helper, and (behind
//! `test-support`) an in-memory fake.

pub mod heartbeat;
pub mod sqs;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use heartbeat::HeartbeatGuard;
pub use sqs::SqsQueue;

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryQueue;
