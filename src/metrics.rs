//! Counters and timings of refinement passes.
//!
//! A [`RefineMetrics`] value is threaded through the refiner and evictor by the caller; nothing is
//! kept in process-wide state. Values from several passes add up with `+=`.

use std::ops::AddAssign;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefineMetrics {
    /// Observations absorbed.
    pub observations: usize,
    /// Buckets whose own region intersected an observation.
    pub located: usize,
    /// New buckets carved out of a parent.
    pub drills: usize,
    /// Drills that overwrote an existing bucket's count instead of creating a child.
    pub in_place_updates: usize,
    /// Forced parent-child merges taken because a bucket had no room left for a drill.
    pub escalations: usize,
    pub parent_child_merges: usize,
    pub sibling_merges: usize,
    /// Parent-child merges of buckets whose own volume was numerically zero.
    pub forced_merges: usize,
    /// Time spent locating, shrinking and drilling.
    pub absorb_time: Duration,
    /// Time spent merging back down to the budget.
    pub evict_time: Duration,
}

impl RefineMetrics {
    /// Merges applied to enforce the budget.
    #[inline]
    pub fn evictions(&self) -> usize {
        self.parent_child_merges + self.sibling_merges
    }
}

impl AddAssign<&RefineMetrics> for RefineMetrics {
    fn add_assign(&mut self, rhs: &RefineMetrics) {
        self.observations += rhs.observations;
        self.located += rhs.located;
        self.drills += rhs.drills;
        self.in_place_updates += rhs.in_place_updates;
        self.escalations += rhs.escalations;
        self.parent_child_merges += rhs.parent_child_merges;
        self.sibling_merges += rhs.sibling_merges;
        self.forced_merges += rhs.forced_merges;
        self.absorb_time += rhs.absorb_time;
        self.evict_time += rhs.evict_time;
    }
}

impl AddAssign for RefineMetrics {
    fn add_assign(&mut self, rhs: RefineMetrics) {
        *self += &rhs;
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn test_accumulate() {
        let mut total = RefineMetrics::default();
        let pass = RefineMetrics {
            observations: 2,
            drills: 3,
            sibling_merges: 1,
            parent_child_merges: 4,
            absorb_time: Duration::from_millis(5),
            ..Default::default()
        };
        total += &pass;
        total += pass;
        assert_eq!(total.observations, 4);
        assert_eq!(total.drills, 6);
        assert_eq!(total.evictions(), 10);
        assert_eq!(total.absorb_time, Duration::from_millis(10));
    }
}
