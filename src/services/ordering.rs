//! Tiered-random presentation order for a collection.
//!
//! Every refresh surfaces one high, one mid and one low tier item at the front
//! (in random order) and shuffles everything else behind them. Rating still
//! drives which items land in which tier, but no two refreshes need look alike.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{ExternalId, LedgerEntry};

/// How items are split into high/mid/low tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum OrderPolicy {
    /// Contiguous thirds of the rating-sorted list (canonical)
    RankThirds,
    /// Thresholds at one and two thirds of `max_points`; rows at zero points are left out
    PointsThresholds { max_points: u32 },
}

impl Default for OrderPolicy {
    fn default() -> Self {
        OrderPolicy::RankThirds
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatedItem {
    pub id: ExternalId,
    pub rating_average: Option<f64>,
    pub rating_count: Option<i64>,
    pub points: u32,
}

impl From<&LedgerEntry> for RatedItem {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.external_id.clone(),
            rating_average: entry.rating_average,
            rating_count: entry.rating_count,
            points: entry.points,
        }
    }
}

fn rating_key(item: &RatedItem) -> f64 {
    match item.rating_average {
        // + 0.0 folds -0.0 into 0.0 so total_cmp treats them alike
        Some(r) if r.is_finite() => r + 0.0,
        _ => 0.0,
    }
}

/// Rating desc, then rating count desc, then id asc
fn compare(a: &RatedItem, b: &RatedItem) -> Ordering {
    rating_key(b)
        .total_cmp(&rating_key(a))
        .then_with(|| b.rating_count.unwrap_or(0).cmp(&a.rating_count.unwrap_or(0)))
        .then_with(|| a.id.cmp(&b.id))
}

fn sorted_unique(items: &[RatedItem]) -> Vec<&RatedItem> {
    let mut seen = HashSet::new();
    let mut unique: Vec<&RatedItem> = items.iter().filter(|i| seen.insert(&i.id)).collect();
    unique.sort_by(|a, b| compare(a, b));
    unique
}

/// Splits items into `[high, mid, low]` tiers, each in rating order
pub fn tiers(items: &[RatedItem], policy: OrderPolicy) -> [Vec<ExternalId>; 3] {
    let sorted = sorted_unique(items);
    let mut out: [Vec<ExternalId>; 3] = Default::default();

    match policy {
        OrderPolicy::RankThirds => {
            let n = sorted.len();
            let base = n / 3;
            let high = base + usize::from(n % 3 > 0);
            let mid = base + usize::from(n % 3 > 1);

            for (pos, item) in sorted.into_iter().enumerate() {
                let tier = if pos < high {
                    0
                } else if pos < high + mid {
                    1
                } else {
                    2
                };
                out[tier].push(item.id.clone());
            }
        }
        OrderPolicy::PointsThresholds { max_points } => {
            let low_max = max_points / 3;
            let mid_max = (2 * max_points) / 3;

            for item in sorted.into_iter().filter(|i| i.points > 0) {
                let tier = if item.points > mid_max {
                    0
                } else if item.points > low_max {
                    1
                } else {
                    2
                };
                out[tier].push(item.id.clone());
            }
        }
    }

    out
}

/// Builds the presentation order for `items`
///
/// The result is a permutation of the (deduplicated, policy-filtered) input:
/// up to three tier picks in shuffled order followed by the shuffled rest.
pub fn build_order<R: Rng + ?Sized>(
    items: &[RatedItem],
    policy: OrderPolicy,
    rng: &mut R,
) -> Vec<ExternalId> {
    let tiers = tiers(items, policy);

    let mut picks: Vec<ExternalId> = Vec::with_capacity(3);
    for tier in &tiers {
        let available: Vec<&ExternalId> = tier.iter().filter(|id| !picks.contains(id)).collect();
        if let Some(id) = available.choose(rng) {
            picks.push((*id).clone());
        }
    }
    picks.shuffle(rng);

    let mut rest: Vec<ExternalId> = tiers
        .into_iter()
        .flatten()
        .filter(|id| !picks.contains(id))
        .collect();
    rest.shuffle(rng);

    picks.extend(rest);
    picks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item(id: u64, rating: Option<f64>, count: Option<i64>, points: u32) -> RatedItem {
        RatedItem {
            id: ExternalId::from(id),
            rating_average: rating,
            rating_count: count,
            points,
        }
    }

    fn sample(n: u64) -> Vec<RatedItem> {
        (1..=n)
            .map(|i| item(i, Some((i % 10) as f64), Some(i as i64 * 3), 50))
            .collect()
    }

    fn sorted_ids(ids: &[ExternalId]) -> Vec<ExternalId> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids
    }

    #[test]
    fn test_empty_input_gives_empty_order() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(build_order(&[], OrderPolicy::RankThirds, &mut rng).is_empty());
    }

    #[test]
    fn test_tier_sizes_put_remainder_in_high_then_mid() {
        let [high, mid, low] = tiers(&sample(5), OrderPolicy::RankThirds);
        assert_eq!((high.len(), mid.len(), low.len()), (2, 2, 1));

        let [high, mid, low] = tiers(&sample(4), OrderPolicy::RankThirds);
        assert_eq!((high.len(), mid.len(), low.len()), (2, 1, 1));

        let [high, mid, low] = tiers(&sample(9), OrderPolicy::RankThirds);
        assert_eq!((high.len(), mid.len(), low.len()), (3, 3, 3));
    }

    #[test]
    fn test_sort_treats_missing_and_nan_ratings_as_zero() {
        let items = vec![
            item(1, None, Some(500), 50),
            item(2, Some(f64::NAN), Some(900), 50),
            item(3, Some(7.5), None, 50),
        ];
        let [high, mid, low] = tiers(&items, OrderPolicy::RankThirds);

        assert_eq!(high, vec![ExternalId::from(3)]);
        // tie at 0.0 broken by rating count
        assert_eq!(mid, vec![ExternalId::from(2)]);
        assert_eq!(low, vec![ExternalId::from(1)]);
    }

    #[test]
    fn test_full_ties_break_by_id() {
        let items = vec![item(9, Some(6.0), Some(10), 50), item(4, Some(6.0), Some(10), 50)];
        let [high, mid, _] = tiers(&items, OrderPolicy::RankThirds);
        assert_eq!(high, vec![ExternalId::from(4)]);
        assert_eq!(mid, vec![ExternalId::from(9)]);
    }

    #[test]
    fn test_output_is_permutation_of_unique_input() {
        let mut items = sample(17);
        items.push(item(3, Some(1.0), None, 5));

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let order = build_order(&items, OrderPolicy::RankThirds, &mut rng);
            let expected: Vec<ExternalId> = (1..=17).map(ExternalId::from).collect();
            assert_eq!(sorted_ids(&order), sorted_ids(&expected));
        }
    }

    #[test]
    fn test_first_three_come_one_from_each_tier() {
        let items = sample(20);
        let [high, mid, low] = tiers(&items, OrderPolicy::RankThirds);

        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let order = build_order(&items, OrderPolicy::RankThirds, &mut rng);
            let head = &order[..3];

            assert_eq!(head.iter().filter(|id| high.contains(id)).count(), 1);
            assert_eq!(head.iter().filter(|id| mid.contains(id)).count(), 1);
            assert_eq!(head.iter().filter(|id| low.contains(id)).count(), 1);
        }
    }

    #[test]
    fn test_small_inputs_pick_only_available_tiers() {
        let mut rng = StdRng::seed_from_u64(3);
        let order = build_order(&sample(2), OrderPolicy::RankThirds, &mut rng);
        assert_eq!(order.len(), 2);

        let order = build_order(&sample(1), OrderPolicy::RankThirds, &mut rng);
        assert_eq!(order, vec![ExternalId::from(1)]);
    }

    #[test]
    fn test_same_seed_gives_same_order() {
        let items = sample(30);
        let a = build_order(&items, OrderPolicy::RankThirds, &mut StdRng::seed_from_u64(42));
        let b = build_order(&items, OrderPolicy::RankThirds, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_orders_vary_across_seeds() {
        let items = sample(30);
        let first = build_order(&items, OrderPolicy::RankThirds, &mut StdRng::seed_from_u64(0));
        let varied = (1..20).any(|seed| {
            build_order(&items, OrderPolicy::RankThirds, &mut StdRng::seed_from_u64(seed)) != first
        });
        assert!(varied);
    }

    #[test]
    fn test_points_thresholds_policy() {
        let items = vec![
            item(1, Some(9.0), None, 50),
            item(2, Some(9.0), None, 34),
            item(3, Some(9.0), None, 33),
            item(4, Some(9.0), None, 17),
            item(5, Some(9.0), None, 16),
            item(6, Some(9.0), None, 0),
        ];
        let policy = OrderPolicy::PointsThresholds { max_points: 50 };
        let [high, mid, low] = tiers(&items, policy);

        assert_eq!(high, vec![ExternalId::from(1), ExternalId::from(2)]);
        assert_eq!(mid, vec![ExternalId::from(3), ExternalId::from(4)]);
        assert_eq!(low, vec![ExternalId::from(5)]);

        let order = build_order(&items, policy, &mut StdRng::seed_from_u64(5));
        assert_eq!(order.len(), 5);
        assert!(!order.contains(&ExternalId::from(6)));
    }

    #[test]
    fn test_policy_serializes_with_kind_tag() {
        let json = serde_json::to_value(OrderPolicy::PointsThresholds { max_points: 50 }).unwrap();
        assert_eq!(json["kind"], "points_thresholds");
        assert_eq!(json["max_points"], 50);
    }
}
