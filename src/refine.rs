//! Absorbing one observation: locate, shrink and drill.
//!
//! For every bucket whose own region meets the observation, the region is shrunk to a hole that no
//! child partially overlaps, and the hole is drilled as a new child whenever the tree's current
//! estimate for it disagrees with the observed share. A bucket with no room left for the hole gives
//! up its exclusivity by merging into its parent, and the drill is retried one level up.

use tracing::{debug, trace};

use crate::bucket::{Bucket, BucketId, Provenance};
use crate::error::InvariantViolation;
use crate::metrics::RefineMetrics;
use crate::region::{approx_eq, edge_lt, is_negligible, Region};
use crate::tree::BucketTree;

/// A bucket touched by an observation and its share of the observed count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Located {
    pub(crate) bucket: BucketId,
    pub(crate) share: f64,
}

impl BucketTree {
    pub(crate) fn absorb(
        &mut self,
        region: &Region,
        count: f64,
        metrics: &mut RefineMetrics,
    ) -> Result<(), InvariantViolation> {
        self.expand_root(region);
        let located = self.locate(region, count);
        metrics.located += located.len();
        debug!(count, located = located.len(), "absorbing observation");

        for Located { bucket, share } in located {
            // merged away by an escalation earlier in this pass
            if !self.arena.contains(bucket) {
                continue;
            }
            self.shrink_and_drill(bucket, region, share, metrics)?;
        }
        Ok(())
    }

    /// Grows the root so it covers `region`.
    fn expand_root(&mut self, region: &Region) {
        let root = &mut self.arena[self.root];
        if root.boundary.is_empty() {
            root.boundary = region.clone();
        } else {
            root.boundary.expand_to(region);
        }
        self.touch(self.root);
    }

    /// Buckets, in pre-order, whose own region meets `region`, with their share of `count`.
    pub(crate) fn locate(&self, region: &Region, count: f64) -> Vec<Located> {
        let volume = region.volume();
        if volume <= 0.0 {
            return Vec::new();
        }
        let mut located = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let bucket = &self.arena[id];
            if !bucket.boundary.intersects(region) {
                continue;
            }
            let own = self.own_intersection_volume(id, region);
            if !is_negligible(own, volume) {
                located.push(Located {
                    bucket: id,
                    share: count * (own / volume).min(1.0),
                });
            }
            stack.extend(bucket.children.iter().rev());
        }
        located
    }

    fn shrink_and_drill(
        &mut self,
        id: BucketId,
        region: &Region,
        share: f64,
        metrics: &mut RefineMetrics,
    ) -> Result<(), InvariantViolation> {
        let Some((hole, target)) = self.shrink(id, region, share) else {
            return Ok(());
        };
        let current = self.estimate_within(id, &hole)?;
        if approx_eq(current, target) {
            return Ok(());
        }
        self.drill(id, hole, target, metrics)
    }

    /// Children of `id` that overlap `hole` without being inside it.
    fn partial_children(&self, id: BucketId, hole: &Region) -> Vec<BucketId> {
        self.arena[id]
            .children
            .iter()
            .copied()
            .filter(|&child| hole.partially_overlaps(&self.arena[child].boundary))
            .collect()
    }

    /// Shrinks the part of `region` inside bucket `id` until no child partially overlaps it.
    ///
    /// Returns the hole and its share of the observation, or `None` when nothing of the bucket's
    /// own region survives the cuts.
    pub(crate) fn shrink(&self, id: BucketId, region: &Region, share: f64) -> Option<(Region, f64)> {
        let mut hole = self.arena[id].boundary.intersection(region)?;
        let mut participants = self.partial_children(id, &hole);

        while !participants.is_empty() {
            // best cut: most own volume kept, then most raw volume kept
            let mut best: Option<((f64, f64), Region)> = None;
            for &child in &participants {
                let edges = &self.arena[child].boundary;
                for dim in 0..hole.dims() {
                    let (low, high) = (hole.low(dim), hole.high(dim));
                    let width = (high - low).max(edges.high(dim) - edges.low(dim));
                    for (side, edge) in [(1, edges.low(dim)), (0, edges.high(dim))] {
                        if !(edge_lt(low, edge, width) && edge_lt(edge, high, width)) {
                            continue;
                        }
                        let candidate = hole.with_edge(dim, side, edge);
                        let score = (
                            self.own_intersection_volume(id, &candidate),
                            candidate.volume(),
                        );
                        if best.as_ref().map_or(true, |(kept, _)| score > *kept) {
                            best = Some((score, candidate));
                        }
                    }
                }
            }
            let (_, cut) = best?;
            trace!(bucket = %id, hole = ?cut, "shrink cut");
            hole = cut;
            participants = self.partial_children(id, &hole);
        }

        let base = self.own_intersection_volume(id, region);
        let exclusive = self.own_intersection_volume(id, &hole);
        if is_negligible(base, region.volume()) || is_negligible(exclusive, hole.volume()) {
            return None;
        }
        Some((hole, share * (exclusive / base).min(1.0)))
    }

    /// Materializes `hole` with `target` tuples under bucket `id`, escalating to ancestors while
    /// the bucket has no room left for it.
    fn drill(
        &mut self,
        mut id: BucketId,
        hole: Region,
        target: f64,
        metrics: &mut RefineMetrics,
    ) -> Result<(), InvariantViolation> {
        loop {
            let bucket = self.arena.try_get(id)?;
            if !bucket.boundary.contains(&hole) {
                return Err(InvariantViolation::DrillOutsideParent {
                    bucket: id,
                    hole: hole.ranges().to_vec(),
                });
            }

            if hole.approx_eq(&bucket.boundary) {
                self.set_count(id, target, metrics);
                return Ok(());
            }

            let (parent, volume) = (bucket.parent, bucket.boundary.volume());
            let room = self.own_volume(id) - self.own_intersection_volume(id, &hole);
            if !is_negligible(room, volume) {
                break;
            }
            match parent {
                // the root's own region lies entirely inside the hole
                None => {
                    self.set_count(id, target, metrics);
                    return Ok(());
                }
                Some(parent) => {
                    debug!(bucket = %id, parent = %parent, "no room to drill, merging into parent");
                    self.merge_into_parent(parent, id, Provenance::ParentMerge)?;
                    metrics.escalations += 1;
                    id = parent;
                }
            }
        }

        let mut moved = Vec::new();
        let mut kept = Vec::new();
        for &child in &self.arena[id].children {
            let boundary = &self.arena[child].boundary;
            if hole.contains(boundary) {
                moved.push(child);
            } else if hole.intersects(boundary) {
                return Err(InvariantViolation::HoleOverlapsChild { bucket: id, child });
            } else {
                kept.push(child);
            }
        }

        let new_id = self.arena.insert(Bucket {
            children: moved.clone(),
            ..Bucket::new(hole, target, Some(id), Provenance::Drill)
        });
        for child in moved {
            self.arena[child].parent = Some(new_id);
        }
        kept.push(new_id);

        let bucket = &mut self.arena[id];
        bucket.children = kept;
        bucket.count = (bucket.count - target).max(0.0);
        self.touch(new_id);
        self.touch(id);
        metrics.drills += 1;
        debug!(bucket = %id, drilled = %new_id, count = target, "drilled");
        Ok(())
    }

    fn set_count(&mut self, id: BucketId, count: f64, metrics: &mut RefineMetrics) {
        self.arena[id].count = count;
        self.touch(id);
        metrics.in_place_updates += 1;
        trace!(bucket = %id, count, "updated in place");
    }
}
