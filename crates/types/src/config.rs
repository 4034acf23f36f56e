//! Configuration shapes shared across crates (the packer's tunables live
//! here rather than in `bf-packer` so that `bf-node`'s config loader can
//! construct them without depending on the packer's algorithm).

use std::collections::HashSet;
use std::time::Duration;

/// Tunables for `bf_packer::pack`.
#[derive(Debug, Clone)]
pub struct PackerConfig {
    /// Hard cap on the total byte count of a single bundle.
    pub max_bundle_size: u64,
    /// A data item larger than this is dropped (never bundled).
    pub max_data_item_size: u64,
    /// Hard cap on the number of data items in a single bundle.
    pub max_data_item_limit: usize,
    /// A data item older than this (relative to "now") forces its plan to ship.
    pub overdue_threshold: Duration,
    /// A plan under this size is considered underweight and held back unless overdue.
    pub target_bundle_size: u64,
    /// `premiumFeatureType` values that get their own dedicated, non-mixed bundles.
    pub dedicated_bundle_types: HashSet<String>,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            max_bundle_size: 2 * 1024 * 1024 * 1024,
            max_data_item_size: 4 * 1024 * 1024 * 1024,
            max_data_item_limit: 5_000,
            overdue_threshold: Duration::from_secs(2 * 60 * 60),
            target_bundle_size: 500 * 1024 * 1024,
            dedicated_bundle_types: HashSet::new(),
        }
    }
}

/// Thresholds used by the verify job.
#[derive(Debug, Clone, Copy)]
pub struct VerifyThresholds {
    pub tx_permanent_threshold: u64,
    pub drop_bundle_tx_threshold_blocks: u64,
    pub retry_limit_for_failed_data_items: usize,
}

impl Default for VerifyThresholds {
    fn default() -> Self {
        Self {
            tx_permanent_threshold: 50,
            drop_bundle_tx_threshold_blocks: 50,
            retry_limit_for_failed_data_items: 3,
        }
    }
}

/// The size of a batch used for multi-row transactions against the database.
pub const DEFAULT_BATCHING_SIZE: usize = 500;
