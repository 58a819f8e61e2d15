//! The bucket tree: a workload-driven histogram over a fixed list of attributes.
//!
//! A [`BucketTree`] starts as a single empty root and learns from a stream of
//! `(region, true count)` [`Observation`]s. Every observation grows the root to cover the region,
//! is absorbed by carving ("drilling") new buckets where the tree disagrees with it, and is followed
//! by merges until the tree is back within its bucket budget.
//!
//! # Example
//!
//! ```
//! use stholes::BucketTree;
//!
//! let mut tree = BucketTree::new(["x"], 10).unwrap();
//! tree.refine([(vec![[0.0, 100.0]], 1000.0), (vec![[10.0, 20.0]], 100.0)]).unwrap();
//!
//! assert_eq!(tree.estimate(&[[10.0, 20.0]], &["x"]).unwrap(), 100.0);
//! assert!((tree.estimate_region(&[[0.0, 100.0]]).unwrap() - 1000.0).abs() < 1e-9);
//! ```

use std::fmt::{Debug, Formatter};
use std::time::Instant;

use tracing::debug;

use crate::bucket::{Arena, Bucket, BucketId, Provenance};
use crate::cache::PenaltyCache;
use crate::config::Config;
use crate::error::{HistogramError, InvariantViolation};
use crate::metrics::RefineMetrics;
use crate::region::Region;
use crate::workload::Observation;

#[derive(Clone)]
pub struct BucketTree {
    config: Config,
    pub(crate) arena: Arena,
    pub(crate) root: BucketId,
    pub(crate) cache: Option<PenaltyCache>,
}

impl BucketTree {
    /// Creates a tree with an empty root over `attributes`, holding at most `bucket_budget` buckets
    /// (root included) after every refinement.
    pub fn new<S: Into<String>>(
        attributes: impl IntoIterator<Item = S>,
        bucket_budget: usize,
    ) -> Result<Self, HistogramError> {
        Self::with_config(Config::new(attributes, bucket_budget)?)
    }

    pub fn with_config(config: Config) -> Result<Self, HistogramError> {
        config.validate()?;
        let mut arena = Arena::default();
        let root = arena.insert(Bucket::new(Region::empty(), 0.0, None, Provenance::Root));
        Ok(Self::from_parts(config, arena, root))
    }

    pub(crate) fn from_parts(config: Config, arena: Arena, root: BucketId) -> Self {
        let cache = config.penalty_cache().then(PenaltyCache::default);
        let mut tree = Self {
            config,
            arena,
            root,
            cache,
        };
        let ids: Vec<BucketId> = tree.buckets().map(|(id, _)| id).collect();
        for id in ids {
            tree.touch(id);
        }
        tree
    }

    /// Absorbs every observation of `workload` in order.
    ///
    /// Returns the counters of this call. An error aborts the pass at the offending observation;
    /// earlier observations stay absorbed.
    pub fn refine<I, O>(&mut self, workload: I) -> Result<RefineMetrics, HistogramError>
    where
        I: IntoIterator<Item = O>,
        O: Into<Observation>,
    {
        let mut metrics = RefineMetrics::default();
        self.refine_with_metrics(workload, &mut metrics)?;
        Ok(metrics)
    }

    /// Like [`BucketTree::refine`], accumulating into caller-owned `metrics`.
    pub fn refine_with_metrics<I, O>(
        &mut self,
        workload: I,
        metrics: &mut RefineMetrics,
    ) -> Result<(), HistogramError>
    where
        I: IntoIterator<Item = O>,
        O: Into<Observation>,
    {
        for observation in workload {
            let observation = observation.into();
            self.observe(&observation.region, observation.count, metrics)?;
        }
        Ok(())
    }

    /// Absorbs a single observation and evicts back down to the budget.
    pub fn observe(
        &mut self,
        region: &[[f64; 2]],
        count: f64,
        metrics: &mut RefineMetrics,
    ) -> Result<(), HistogramError> {
        let region = self.validate_region(region)?;
        if !count.is_finite() || count < 0.0 {
            return Err(HistogramError::InvalidCount(count));
        }

        let started = Instant::now();
        self.absorb(&region, count, metrics)?;
        self.debug_check()?;
        metrics.absorb_time += started.elapsed();

        let started = Instant::now();
        self.evict(metrics)?;
        self.check_budget()?;
        metrics.evict_time += started.elapsed();

        metrics.observations += 1;
        debug!(
            count,
            buckets = self.bucket_count(),
            total = self.total_tuples(),
            "observation absorbed"
        );
        Ok(())
    }

    /// Checks that `ranges` is a well-formed region with one range per attribute.
    pub(crate) fn validate_region(&self, ranges: &[[f64; 2]]) -> Result<Region, HistogramError> {
        if ranges.len() != self.config.dims() {
            return Err(HistogramError::DimensionMismatch {
                expected: self.config.dims(),
                found: ranges.len(),
            });
        }
        Region::new(ranges.to_vec())
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn attributes(&self) -> &[String] {
        self.config.attributes()
    }

    #[inline]
    pub fn bucket_budget(&self) -> usize {
        self.config.bucket_budget()
    }

    /// Number of buckets, root included.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.arena.len()
    }

    /// Sum of the counts of all buckets.
    pub fn total_tuples(&self) -> f64 {
        self.buckets().map(|(_, bucket)| bucket.count).sum()
    }

    #[inline]
    pub fn root(&self) -> BucketId {
        self.root
    }

    /// Extent of the root, or `None` before the first observation.
    pub fn root_boundary(&self) -> Option<&Region> {
        let boundary = &self.arena[self.root].boundary;
        (!boundary.is_empty()).then_some(boundary)
    }

    #[inline]
    pub fn get(&self, id: BucketId) -> Option<&Bucket> {
        self.arena.get(id)
    }

    /// Buckets in pre-order: every parent before its children, children in stored order.
    pub fn buckets(&self) -> PreOrder<'_> {
        PreOrder {
            tree: self,
            stack: vec![self.root],
        }
    }

    /// Raw volume of the bucket minus the raw volumes of its children.
    pub fn own_volume(&self, id: BucketId) -> f64 {
        let bucket = &self.arena[id];
        bucket.boundary.volume()
            - bucket
                .children
                .iter()
                .map(|&child| self.arena[child].boundary.volume())
                .sum::<f64>()
    }

    /// Volume of `region` inside the bucket but outside all of its children.
    pub(crate) fn own_intersection_volume(&self, id: BucketId, region: &Region) -> f64 {
        let bucket = &self.arena[id];
        let volume = bucket.boundary.intersection_volume(region);
        if volume == 0.0 {
            return 0.0;
        }
        let covered: f64 = bucket
            .children
            .iter()
            .map(|&child| self.arena[child].boundary.intersection_volume(region))
            .sum();
        (volume - covered).max(0.0)
    }

    /// Marks `id` and its parent as changed for the penalty cache.
    pub(crate) fn touch(&mut self, id: BucketId) {
        if let Some(cache) = self.cache.as_mut() {
            cache.mark(id);
            if let Some(parent) = self.arena.get(id).and_then(|bucket| bucket.parent) {
                cache.mark(parent);
            }
        }
    }

    /// Frees a bucket that has already been detached from its parent.
    pub(crate) fn release(&mut self, id: BucketId) -> Result<Bucket, InvariantViolation> {
        if let Some(cache) = self.cache.as_mut() {
            cache.forget(id);
        }
        self.arena.remove(id)
    }

    /// Runs the full invariant check in debug builds and with the `invariants` feature.
    #[inline]
    pub(crate) fn debug_check(&self) -> Result<(), InvariantViolation> {
        #[cfg(any(debug_assertions, feature = "invariants"))]
        self.check_invariants()?;
        Ok(())
    }
}

/// Pre-order iterator over the buckets of a tree, see [`BucketTree::buckets`].
pub struct PreOrder<'a> {
    tree: &'a BucketTree,
    stack: Vec<BucketId>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = (BucketId, &'a Bucket);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let bucket = self.tree.arena.get(id)?;
        self.stack.extend(bucket.children.iter().rev());
        Some((id, bucket))
    }
}

impl Debug for BucketTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTree")
            .field("attributes", &self.config.attributes())
            .field("buckets", &self.bucket_count())
            .field("budget", &self.bucket_budget())
            .field("total", &self.total_tuples())
            .finish()
    }
}

impl PartialEq for BucketTree {
    /// Trees are equal when they have the same shape, boundaries, counts and provenance.
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use test_case::test_case;

    fn tree(budget: usize) -> BucketTree {
        BucketTree::new(["x"], budget).unwrap()
    }

    #[test]
    fn test_new_tree_is_a_single_empty_root() {
        let tree = tree(3);
        assert_eq!(tree.bucket_count(), 1);
        assert_eq!(tree.total_tuples(), 0.0);
        assert_eq!(tree.root_boundary(), None);
        assert_eq!(tree.get(tree.root()).unwrap().provenance(), Provenance::Root);
        assert_eq!(
            format!("{:?}", tree),
            r#"BucketTree { attributes: ["x"], buckets: 1, budget: 3, total: 0.0 }"#
        );
    }

    #[test_case(vec![[0.0, 1.0], [0.0, 1.0]], 1.0 => Err(HistogramError::DimensionMismatch { expected: 1, found: 2 }))]
    #[test_case(vec![[1.0, 0.0]], 1.0 => Err(HistogramError::InvalidRange { index: 0, low: 1.0, high: 0.0 }))]
    #[test_case(vec![[0.0, 1.0]], -1.0 => Err(HistogramError::InvalidCount(-1.0)))]
    #[test_case(vec![[0.0, 1.0]], 5.0 => Ok(()))]
    fn test_observe_validation(region: Vec<[f64; 2]>, count: f64) -> Result<(), HistogramError> {
        let mut tree = tree(3);
        let result = tree.refine([(region, count)]).map(|_| ());
        if result.is_err() {
            assert_eq!(tree.bucket_count(), 1);
            assert_eq!(tree.root_boundary(), None);
        }
        result
    }

    #[test]
    fn test_first_observation_sets_root_extent() {
        let mut tree = tree(3);
        let metrics = tree.refine([(vec![[5.0, 15.0]], 40.0)]).unwrap();
        assert_eq!(metrics.observations, 1);
        assert_eq!(metrics.in_place_updates, 1);
        assert_eq!(tree.bucket_count(), 1);
        assert_eq!(tree.root_boundary().unwrap().ranges(), &[[5.0, 15.0]]);
        assert_eq!(tree.total_tuples(), 40.0);
    }

    #[test]
    fn test_root_grows_to_cover_observations() {
        let mut tree = tree(10);
        tree.refine([(vec![[5.0, 15.0]], 40.0), (vec![[-5.0, 0.0]], 10.0)])
            .unwrap();
        assert_eq!(tree.root_boundary().unwrap().ranges(), &[[-5.0, 15.0]]);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_pre_order() {
        let mut tree = tree(10);
        tree.refine([
            (vec![[0.0, 100.0]], 100.0),
            (vec![[10.0, 20.0]], 50.0),
            (vec![[60.0, 70.0]], 5.0),
            (vec![[12.0, 14.0]], 30.0),
        ])
        .unwrap();
        let boundaries: Vec<_> = tree
            .buckets()
            .map(|(_, bucket)| bucket.boundary().ranges()[0])
            .collect();
        assert_eq!(
            boundaries,
            vec![[0.0, 100.0], [10.0, 20.0], [12.0, 14.0], [60.0, 70.0]]
        );
        assert_eq!(tree.own_volume(tree.root()), 80.0);
    }
}
