#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! The job scheduler plus the five job bodies that carry a bundle plan
//! through the pipeline: plan, prepare, post, seed, and verify.

pub mod concurrency;
pub mod plan;
pub mod post;
pub mod prepare;
pub mod scheduler;
pub mod seed;
#[cfg(test)]
mod test_support;
pub mod verify;
