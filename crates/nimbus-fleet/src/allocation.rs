//! Allocation strategy engine.
//!
//! A pure function from (pool, capacity to fulfill, strategy) to an
//! ordered list of (pool entry, unit count). Instances are discrete, so
//! every allocation rounds up: the weighted total meets or exceeds the
//! requested capacity, overshooting by less than one unit of the last
//! entry drawn from.
//!
//! - **Cost-minimizing** (`lowestPrice` / `lowestCost`): entries are ranked
//!   by effective unit price, unknown prices last, pool order breaking
//!   ties. The cheapest entry is never capped, so it covers the whole
//!   demand on its own.
//! - **Diversified**: one unit per entry in pool order, round after round,
//!   until the accumulated weight covers the demand. Unit counts across
//!   entries differ by at most one.
//!
//! A demand that would need more than [`MAX_ALLOCATION_UNITS`] instances
//! is rejected rather than partially covered.

use std::cmp::Ordering;

use serde::Serialize;
use tracing::debug;

use crate::error::{FleetError, FleetResult};
use crate::pool::{LaunchSpecPool, PoolEntry};
use crate::types::AllocationStrategy;

/// Slack for floating-point weight arithmetic. Capacities within this
/// distance of each other count as equal.
pub const EPSILON: f64 = 1e-9;

/// Most instances a single allocation may launch.
pub const MAX_ALLOCATION_UNITS: u64 = 100_000;

/// Units to launch from one pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllocationItem {
    /// Index into the pool.
    pub entry: usize,
    pub units: u32,
    /// `units * weighted_capacity` of the entry.
    pub weight: f64,
}

/// The outcome of one allocation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Allocation {
    items: Vec<AllocationItem>,
}

impl Allocation {
    /// Items in the order they were chosen. Entries with zero units are
    /// never included.
    pub fn items(&self) -> &[AllocationItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_units(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.units)).sum()
    }

    pub fn total_weight(&self) -> f64 {
        self.items.iter().map(|i| i.weight).sum()
    }
}

/// Allocate enough units from `pool` to cover `capacity`.
///
/// Returns an empty allocation when `capacity` is zero, negative or NaN,
/// and a configuration error when covering it would take more than
/// [`MAX_ALLOCATION_UNITS`] instances.
pub fn allocate(
    pool: &LaunchSpecPool,
    capacity: f64,
    strategy: AllocationStrategy,
) -> FleetResult<Allocation> {
    if capacity.is_nan() || capacity <= EPSILON {
        return Ok(Allocation::default());
    }

    let allocation = match strategy {
        AllocationStrategy::LowestPrice | AllocationStrategy::LowestCost => {
            allocate_lowest_price(pool, capacity)?
        }
        AllocationStrategy::Diversified => allocate_diversified(pool, capacity)?,
    };

    debug!(
        %strategy,
        capacity,
        units = allocation.total_units(),
        weight = allocation.total_weight(),
        "allocation computed"
    );
    Ok(allocation)
}

/// Pool entries ranked cheapest first. Unknown prices sort after every
/// known price; equal prices keep pool order.
pub fn price_order(pool: &LaunchSpecPool) -> Vec<&PoolEntry> {
    let mut ranked: Vec<&PoolEntry> = pool.entries().iter().collect();
    ranked.sort_by(|a, b| compare_price(a.price, b.price).then(a.index.cmp(&b.index)));
    ranked
}

fn compare_price(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn allocate_lowest_price(pool: &LaunchSpecPool, capacity: f64) -> FleetResult<Allocation> {
    // Entries have unlimited availability, so the cheapest one absorbs
    // all of the demand and the spill-over to the next is never reached.
    let Some(cheapest) = price_order(pool).into_iter().next() else {
        return Ok(Allocation::default());
    };

    let needed = ((capacity / cheapest.weighted_capacity) - EPSILON).ceil().max(1.0);
    let units = within_limit(needed, capacity)?;
    Ok(Allocation {
        items: vec![AllocationItem {
            entry: cheapest.index,
            units,
            weight: f64::from(units) * cheapest.weighted_capacity,
        }],
    })
}

fn allocate_diversified(pool: &LaunchSpecPool, capacity: f64) -> FleetResult<Allocation> {
    let entries = pool.entries();
    if entries.is_empty() {
        return Ok(Allocation::default());
    }
    let round_weight: f64 = entries.iter().map(|e| e.weighted_capacity).sum();

    // Whole rounds that stay strictly below the demand, then walk the
    // final partial round one unit at a time. The partial round adds at
    // most one unit per entry.
    let full_rounds = ((capacity / round_weight) - EPSILON).floor().max(0.0);
    let entry_count = entries.len() as f64;
    within_limit((full_rounds + 1.0) * entry_count, capacity)?;
    let full_rounds = within_limit(full_rounds, capacity)?;

    let mut units: Vec<u32> = vec![full_rounds; entries.len()];
    let mut accumulated = f64::from(full_rounds) * round_weight;

    for (i, entry) in entries.iter().enumerate() {
        if accumulated + EPSILON >= capacity {
            break;
        }
        units[i] += 1;
        accumulated += entry.weighted_capacity;
    }

    Ok(Allocation {
        items: entries
            .iter()
            .zip(units)
            .filter(|(_, n)| *n > 0)
            .map(|(entry, n)| AllocationItem {
                entry: entry.index,
                units: n,
                weight: f64::from(n) * entry.weighted_capacity,
            })
            .collect(),
    })
}

/// Convert a unit count to `u32`, rejecting counts above
/// [`MAX_ALLOCATION_UNITS`].
fn within_limit(units: f64, capacity: f64) -> FleetResult<u32> {
    if !units.is_finite() || units > MAX_ALLOCATION_UNITS as f64 {
        return Err(FleetError::Configuration(format!(
            "covering capacity {capacity} needs more than {MAX_ALLOCATION_UNITS} instances"
        )));
    }
    Ok(units as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LaunchSpecification;

    fn entry(index: usize, instance_type: &str, weight: f64, price: Option<f64>) -> PoolEntry {
        PoolEntry {
            index,
            instance_type: instance_type.to_string(),
            weighted_capacity: weight,
            price,
            spec: LaunchSpecification::new(instance_type).with_weight(weight),
        }
    }

    fn pool(entries: Vec<PoolEntry>) -> LaunchSpecPool {
        LaunchSpecPool::from_entries(entries).unwrap()
    }

    fn allocate(pool: &LaunchSpecPool, capacity: f64, strategy: AllocationStrategy) -> Allocation {
        super::allocate(pool, capacity, strategy).unwrap()
    }

    fn units_for(allocation: &Allocation, entry: usize) -> u32 {
        allocation
            .items()
            .iter()
            .filter(|i| i.entry == entry)
            .map(|i| i.units)
            .sum()
    }

    /// small: weight 2 @ 0.13, large: weight 4 @ 10.00
    fn two_spec_pool() -> LaunchSpecPool {
        pool(vec![
            entry(0, "t2.small", 2.0, Some(0.13)),
            entry(1, "t2.large", 4.0, Some(10.0)),
        ])
    }

    fn assert_covers(allocation: &Allocation, pool: &LaunchSpecPool, capacity: f64) {
        let total = allocation.total_weight();
        assert!(total + EPSILON >= capacity, "total {total} below {capacity}");
        let largest_used = allocation
            .items()
            .iter()
            .map(|i| pool.get(i.entry).unwrap().weighted_capacity)
            .fold(0.0, f64::max);
        assert!(
            total - capacity < largest_used,
            "overshoot {} not below largest weight {largest_used}",
            total - capacity
        );
    }

    #[test]
    fn lowest_price_single_spec_rounds_up() {
        let p = pool(vec![entry(0, "t2.small", 2.0, Some(0.13))]);
        let a = allocate(&p, 6.0, AllocationStrategy::LowestPrice);
        assert_eq!(a.items().len(), 1);
        assert_eq!(units_for(&a, 0), 3);
        assert_eq!(a.total_weight(), 6.0);
    }

    #[test]
    fn lowest_price_picks_cheapest_only() {
        let p = two_spec_pool();
        let a = allocate(&p, 6.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 3);
        assert_eq!(units_for(&a, 1), 0);

        // Growth by 14 stays on the cheap spec.
        let a = allocate(&p, 14.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 7);
    }

    #[test]
    fn lowest_price_odd_capacity_overshoots_by_less_than_one_unit() {
        let p = two_spec_pool();
        let a = allocate(&p, 1.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 1);
        assert_eq!(a.total_weight(), 2.0);

        let p = pool(vec![entry(0, "t2.large", 4.0, Some(0.1))]);
        let a = allocate(&p, 5.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 2);
        assert_covers(&a, &p, 5.0);
    }

    #[test]
    fn lowest_cost_is_same_ordering_as_lowest_price() {
        let p = pool(vec![
            entry(0, "m5.large", 1.0, Some(0.5)),
            entry(1, "t2.small", 1.0, Some(0.2)),
        ]);
        let price = allocate(&p, 3.0, AllocationStrategy::LowestPrice);
        let cost = allocate(&p, 3.0, AllocationStrategy::LowestCost);
        assert_eq!(price, cost);
        assert_eq!(units_for(&cost, 1), 3);
    }

    #[test]
    fn unknown_prices_sort_last_and_ties_keep_pool_order() {
        let p = pool(vec![
            entry(0, "a", 1.0, None),
            entry(1, "b", 1.0, Some(0.3)),
            entry(2, "c", 1.0, Some(0.3)),
            entry(3, "d", 1.0, None),
        ]);
        let order: Vec<usize> = price_order(&p).iter().map(|e| e.index).collect();
        assert_eq!(order, vec![1, 2, 0, 3]);

        let a = allocate(&p, 2.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 1), 2);
    }

    #[test]
    fn all_unknown_prices_use_first_in_pool() {
        let p = pool(vec![entry(0, "t2.small", 2.0, None), entry(1, "t2.large", 4.0, None)]);
        let a = allocate(&p, 6.0, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 3);
    }

    #[test]
    fn diversified_exact_fit_uses_one_of_each() {
        let p = two_spec_pool();
        let a = allocate(&p, 6.0, AllocationStrategy::Diversified);
        assert_eq!(units_for(&a, 0), 1);
        assert_eq!(units_for(&a, 1), 1);
        assert_eq!(a.total_weight(), 6.0);
    }

    #[test]
    fn diversified_nineteen_reaches_twenty() {
        let p = two_spec_pool();
        let a = allocate(&p, 19.0, AllocationStrategy::Diversified);
        assert_eq!(a.total_weight(), 20.0);
        assert_eq!(units_for(&a, 0), 4);
        assert_eq!(units_for(&a, 1), 3);
        assert!(units_for(&a, 0).abs_diff(units_for(&a, 1)) <= 1);
    }

    #[test]
    fn diversified_growth_from_six_to_nineteen() {
        // Growing a fleet holding 6.0 to 19 asks for 13 more.
        let p = two_spec_pool();
        let a = allocate(&p, 13.0, AllocationStrategy::Diversified);
        assert_eq!(units_for(&a, 0), 3);
        assert_eq!(units_for(&a, 1), 2);
        assert_eq!(a.total_units(), 5);
        assert_eq!(a.total_weight(), 14.0);
    }

    #[test]
    fn diversified_small_demand_stops_at_first_entry() {
        let p = two_spec_pool();
        let a = allocate(&p, 1.0, AllocationStrategy::Diversified);
        assert_eq!(a.items().len(), 1);
        assert_eq!(units_for(&a, 0), 1);
    }

    #[test]
    fn diversified_preserves_pool_order() {
        let p = pool(vec![
            entry(0, "c", 1.0, Some(0.9)),
            entry(1, "b", 1.0, Some(0.1)),
            entry(2, "a", 1.0, Some(0.5)),
        ]);
        let a = allocate(&p, 5.0, AllocationStrategy::Diversified);
        let order: Vec<(usize, u32)> = a.items().iter().map(|i| (i.entry, i.units)).collect();
        assert_eq!(order, vec![(0, 2), (1, 2), (2, 1)]);
    }

    #[test]
    fn zero_or_negative_capacity_is_empty() {
        let p = two_spec_pool();
        for strategy in [AllocationStrategy::LowestPrice, AllocationStrategy::Diversified] {
            assert!(allocate(&p, 0.0, strategy).is_empty());
            assert!(allocate(&p, -4.0, strategy).is_empty());
            assert!(allocate(&p, f64::NAN, strategy).is_empty());
        }
    }

    #[test]
    fn fractional_weights_do_not_over_allocate_from_rounding_noise() {
        let p = pool(vec![entry(0, "t2.nano", 0.1, Some(0.01))]);
        let a = allocate(&p, 0.3, AllocationStrategy::LowestPrice);
        assert_eq!(units_for(&a, 0), 3);
    }

    #[test]
    fn coverage_holds_across_demands() {
        let pools = [
            two_spec_pool(),
            pool(vec![
                entry(0, "a", 1.5, Some(0.2)),
                entry(1, "b", 3.0, Some(0.1)),
                entry(2, "c", 0.5, None),
            ]),
        ];
        for p in &pools {
            for strategy in [
                AllocationStrategy::LowestPrice,
                AllocationStrategy::LowestCost,
                AllocationStrategy::Diversified,
            ] {
                for capacity in 1..=40 {
                    let capacity = f64::from(capacity);
                    let a = allocate(p, capacity, strategy);
                    assert_covers(&a, p, capacity);
                }
            }
        }
    }

    #[test]
    fn diversified_counts_differ_by_at_most_one() {
        let p = pool(vec![
            entry(0, "a", 1.0, None),
            entry(1, "b", 2.0, None),
            entry(2, "c", 3.0, None),
        ]);
        for capacity in 1..=50 {
            let a = allocate(&p, f64::from(capacity), AllocationStrategy::Diversified);
            let counts: Vec<u32> = (0..3).map(|i| units_for(&a, i)).collect();
            let max = counts.iter().max().copied().unwrap_or(0);
            let min = counts.iter().min().copied().unwrap_or(0);
            assert!(max - min <= 1, "capacity {capacity}: {counts:?}");
        }
    }

    #[test]
    fn demand_beyond_unit_limit_is_rejected() {
        let p = pool(vec![entry(0, "t2.nano", 1e-9, Some(0.01))]);
        for strategy in [AllocationStrategy::LowestPrice, AllocationStrategy::Diversified] {
            let err = super::allocate(&p, 10.0, strategy).unwrap_err();
            assert!(matches!(err, FleetError::Configuration(_)), "{strategy}: {err}");
        }

        let p = two_spec_pool();
        let limit = MAX_ALLOCATION_UNITS as f64;
        assert!(super::allocate(&p, 2.0 * limit + 1.0, AllocationStrategy::LowestPrice).is_err());
        let a = allocate(&p, 2.0 * limit, AllocationStrategy::LowestPrice);
        assert_eq!(a.total_units(), MAX_ALLOCATION_UNITS);
        assert!(a.total_weight() >= 2.0 * limit);
    }
}
