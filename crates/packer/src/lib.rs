#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! The bundle packer: a pure function that groups data items into
//! size- and count-bounded bundle plans.
//!
//! `pack` takes no capability dependencies and performs no I/O — it is safe
//! to call from a test with hand-built input and call repeatedly with
//! identical input for identical output.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

pub use bf_types::PackerConfig;

/// A single data item as seen by the packer: only the fields needed to place
/// it into a plan.
#[derive(Debug, Clone)]
pub struct PackItem<Id> {
    pub data_item_id: Id,
    pub byte_count: u64,
    pub uploaded_date: DateTime<Utc>,
    pub premium_feature_type: Option<String>,
}

/// A packed group of data items, not yet assigned a `plan_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedPlan<Id> {
    pub data_item_ids: Vec<Id>,
    pub total_byte_count: u64,
    pub contains_overdue_item: bool,
}

/// In-progress accumulator for a single plan during first-fit packing.
struct PlanAccumulator<Id> {
    ids: Vec<Id>,
    total: u64,
    contains_overdue: bool,
}

/// Packs `items` into plans honoring `config`'s caps, relative to `now`.
///
/// Items are processed in the given order; an item larger than
/// `config.max_data_item_size` is dropped (logged, never bundled). Items are
/// partitioned by `premium_feature_type` first so that a dedicated feature
/// type's bundles never mix with `default` traffic, then each partition is
/// packed independently with first-fit-lowest-index placement. Plans that are
/// neither overdue nor at least `target_bundle_size` bytes are dropped from
/// the returned set — they are left for a future tick to reconsider once more
/// items have accumulated.
pub fn pack<Id: Clone>(items: Vec<PackItem<Id>>, config: &PackerConfig, now: DateTime<Utc>) -> Vec<PackedPlan<Id>> {
    let mut partitions: HashMap<Option<String>, Vec<PackItem<Id>>> = HashMap::new();
    for item in items {
        let key = item
            .premium_feature_type
            .clone()
            .filter(|t| config.dedicated_bundle_types.contains(t));
        partitions.entry(key).or_default().push(item);
    }

    // Iterate in a deterministic order: `default` (None) first, then
    // dedicated types sorted lexicographically, so that repeated calls with
    // the same input always emit plans in the same order.
    let mut keys: Vec<Option<String>> = partitions.keys().cloned().collect();
    keys.sort_by(|a, b| a.as_deref().unwrap_or("").cmp(b.as_deref().unwrap_or("")));

    let mut result = Vec::new();
    for key in keys {
        let Some(items) = partitions.remove(&key) else {
            continue;
        };
        result.extend(pack_partition(items, config, now));
    }
    result
}

fn pack_partition<Id: Clone>(
    items: Vec<PackItem<Id>>,
    config: &PackerConfig,
    now: DateTime<Utc>,
) -> Vec<PackedPlan<Id>> {
    let mut plans: Vec<PlanAccumulator<Id>> = Vec::new();

    for item in items {
        if item.byte_count > config.max_data_item_size {
            tracing::warn!(
                byte_count = item.byte_count,
                max_data_item_size = config.max_data_item_size,
                "dropping oversize data item from packing"
            );
            continue;
        }

        let is_overdue = now
            .signed_duration_since(item.uploaded_date)
            .to_std()
            .map(|age| age >= config.overdue_threshold)
            .unwrap_or(false);

        let mut placed = false;
        for plan in plans.iter_mut() {
            if plan.total + item.byte_count <= config.max_bundle_size
                && plan.ids.len() < config.max_data_item_limit
            {
                plan.total += item.byte_count;
                plan.ids.push(item.data_item_id.clone());
                plan.contains_overdue |= is_overdue;
                placed = true;
                break;
            }
        }
        if !placed {
            plans.push(PlanAccumulator {
                ids: vec![item.data_item_id.clone()],
                total: item.byte_count,
                contains_overdue: is_overdue,
            });
        }
    }

    plans
        .into_iter()
        .filter_map(|plan| {
            if plan.ids.is_empty() {
                return None;
            }
            let shippable = plan.contains_overdue || plan.total >= config.target_bundle_size;
            if !shippable {
                return None;
            }
            Some(PackedPlan {
                data_item_ids: plan.ids,
                total_byte_count: plan.total,
                contains_overdue_item: plan.contains_overdue,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn item(id: &str, bytes: u64, age_secs: i64, now: DateTime<Utc>) -> PackItem<String> {
        PackItem {
            data_item_id: id.to_string(),
            byte_count: bytes,
            uploaded_date: now - chrono::Duration::seconds(age_secs),
            premium_feature_type: None,
        }
    }

    fn small_config() -> PackerConfig {
        PackerConfig {
            max_bundle_size: 100,
            max_data_item_size: 1000,
            max_data_item_limit: 3,
            overdue_threshold: StdDuration::from_secs(3600),
            target_bundle_size: 0,
            dedicated_bundle_types: Default::default(),
        }
    }

    #[test]
    fn happy_path_three_small_items() {
        let now = Utc::now();
        let config = small_config();
        let items = vec![
            item("t1", 10, 0, now),
            item("t2", 10, 0, now),
            item("t3", 10, 0, now),
        ];
        let plans = pack(items, &config, now);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].data_item_ids, vec!["t1", "t2", "t3"]);
        assert_eq!(plans[0].total_byte_count, 30);
    }

    #[test]
    fn first_fit_lowest_index_placement() {
        let now = Utc::now();
        let mut config = small_config();
        config.max_bundle_size = 100;
        let items = vec![
            item("t1", 90, 0, now),
            item("t2", 90, 0, now),
            item("t3", 10, 0, now),
        ];
        let plans = pack(items, &config, now);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].data_item_ids, vec!["t1", "t3"]);
        assert_eq!(plans[0].total_byte_count, 100);
        assert_eq!(plans[1].data_item_ids, vec!["t2"]);
        assert_eq!(plans[1].total_byte_count, 90);
    }

    #[test]
    fn item_limit_overflow_splits_into_four_plans() {
        let now = Utc::now();
        let mut config = small_config();
        config.max_bundle_size = 1000;
        config.max_data_item_limit = 3;
        let items: Vec<_> = (0..10)
            .map(|i| item(&format!("t{i}"), 10, 0, now))
            .collect();
        let plans = pack(items, &config, now);
        let sizes: Vec<usize> = plans.iter().map(|p| p.data_item_ids.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn oversize_item_yields_zero_plans() {
        let now = Utc::now();
        let config = small_config();
        let items = vec![item("huge", 10_000, 0, now)];
        let plans = pack(items, &config, now);
        assert!(plans.is_empty());
    }

    #[test]
    fn underweight_non_overdue_plan_is_dropped() {
        let now = Utc::now();
        let mut config = small_config();
        config.target_bundle_size = 1000;
        let items = vec![item("t1", 10, 0, now)];
        let plans = pack(items, &config, now);
        assert!(plans.is_empty());
    }

    #[test]
    fn overdue_item_forces_shipment_even_if_underweight() {
        let now = Utc::now();
        let mut config = small_config();
        config.target_bundle_size = 1000;
        config.overdue_threshold = StdDuration::from_secs(10);
        let items = vec![item("t1", 10, 3600, now)];
        let plans = pack(items, &config, now);
        assert_eq!(plans.len(), 1);
        assert!(plans[0].contains_overdue_item);
    }

    #[test]
    fn dedicated_feature_types_never_share_a_bundle_with_default() {
        let now = Utc::now();
        let mut config = small_config();
        config.dedicated_bundle_types.insert("ario-data".to_string());
        let mut a = item("t1", 10, 0, now);
        a.premium_feature_type = Some("ario-data".to_string());
        let b = item("t2", 10, 0, now);
        let plans = pack(vec![a, b], &config, now);
        assert_eq!(plans.len(), 2);
        for p in &plans {
            assert_eq!(p.data_item_ids.len(), 1);
        }
    }

    #[test]
    fn packing_is_deterministic() {
        let now = Utc::now();
        let config = small_config();
        let items = vec![
            item("t1", 10, 0, now),
            item("t2", 10, 0, now),
            item("t3", 10, 0, now),
        ];
        let first = pack(items.clone(), &config, now);
        let second = pack(items, &config, now);
        assert_eq!(first, second);
    }

    #[test]
    fn never_exceeds_caps() {
        let now = Utc::now();
        let config = small_config();
        let items: Vec<_> = (0..37)
            .map(|i| item(&format!("t{i}"), (i % 13) as u64 + 1, 0, now))
            .collect();
        let plans = pack(items, &config, now);
        for p in &plans {
            assert!(p.total_byte_count <= config.max_bundle_size);
            assert!(p.data_item_ids.len() <= config.max_data_item_limit);
            assert!(!p.data_item_ids.is_empty());
        }
    }
}
