//! Budget enforcement through penalty-ranked merges.
//!
//! Two kinds of merge shrink the tree by at least one bucket:
//! - [`ParentChildMerge`] folds a child back into its parent, which keeps its boundary.
//! - [`SiblingMerge`] replaces two siblings by their enclosing box, pulling in every other sibling
//!   that box contains or overlaps.
//!
//! The penalty of a merge is the L1 difference between the counts the merged buckets had and what the
//! merged bucket's uniform density would give them back. Merges are ranked forced first, then by
//! penalty, then by a deterministic [`MergeKey`], so a full scan and the penalty cache always agree.

use std::cmp::Ordering;

use enum_dispatch::enum_dispatch;
use tracing::debug;

use crate::bucket::{Bucket, BucketId, Provenance};
use crate::error::{HistogramError, InvariantViolation};
use crate::metrics::RefineMetrics;
use crate::region::{is_negligible, Region};
use crate::tree::BucketTree;

/// Tie-break between merges of equal penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct MergeKey {
    kind: u8,
    parent: BucketId,
    first: BucketId,
    second: Option<BucketId>,
}

/// Merge candidates supported by the evictor.
#[derive(Debug, Clone, PartialEq)]
#[enum_dispatch]
pub(crate) enum Merge {
    ParentChild(ParentChildMerge),
    Siblings(SiblingMerge),
}

/// Operations every merge candidate implements.
#[enum_dispatch(Merge)]
pub(crate) trait MergeTrait {
    /// Estimation error introduced by applying the merge.
    fn penalty(&self) -> f64;
    /// Whether the merge must be taken before any other.
    fn forced(&self) -> bool;
    fn key(&self) -> MergeKey;
    /// Applies the merge, returning the surviving bucket.
    fn apply(
        self,
        tree: &mut BucketTree,
        metrics: &mut RefineMetrics,
    ) -> Result<BucketId, InvariantViolation>;
}

impl Merge {
    /// Total order used to pick the merge to apply.
    pub(crate) fn rank(&self, other: &Merge) -> Ordering {
        other
            .forced()
            .cmp(&self.forced())
            .then_with(|| self.penalty().total_cmp(&other.penalty()))
            .then_with(|| self.key().cmp(&other.key()))
    }
}

/// Folds `child` into `parent`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParentChildMerge {
    parent: BucketId,
    child: BucketId,
    penalty: f64,
    forced: bool,
}

impl ParentChildMerge {
    pub(crate) fn evaluate(tree: &BucketTree, parent: BucketId, child: BucketId) -> Self {
        let (p, c) = (&tree.arena[parent], &tree.arena[child]);
        let (vp, vc) = (tree.own_volume(parent), tree.own_volume(child));
        let merged_volume = vp + vc;
        let merged_count = p.count + c.count;
        let penalty = if is_negligible(merged_volume, p.boundary.volume()) {
            0.0
        } else {
            (p.count - merged_count * vp / merged_volume).abs()
                + (c.count - merged_count * vc / merged_volume).abs()
        };
        Self {
            parent,
            child,
            penalty,
            forced: false,
        }
    }

    /// Merge of a bucket whose own volume vanished into one of its children.
    pub(crate) fn degenerate(parent: BucketId, child: BucketId) -> Self {
        Self {
            parent,
            child,
            penalty: 0.0,
            forced: true,
        }
    }
}

impl MergeTrait for ParentChildMerge {
    fn penalty(&self) -> f64 {
        self.penalty
    }

    fn forced(&self) -> bool {
        self.forced
    }

    fn key(&self) -> MergeKey {
        MergeKey {
            kind: if self.forced { 0 } else { 1 },
            parent: self.parent,
            first: self.child,
            second: None,
        }
    }

    fn apply(
        self,
        tree: &mut BucketTree,
        metrics: &mut RefineMetrics,
    ) -> Result<BucketId, InvariantViolation> {
        tree.merge_into_parent(self.parent, self.child, Provenance::ParentMerge)?;
        metrics.parent_child_merges += 1;
        if self.forced {
            metrics.forced_merges += 1;
        }
        debug!(
            parent = %self.parent,
            child = %self.child,
            penalty = self.penalty,
            forced = self.forced,
            "merged child into parent"
        );
        Ok(self.parent)
    }
}

/// Replaces siblings `first` and `second` by their enclosing box.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SiblingMerge {
    parent: BucketId,
    first: BucketId,
    second: BucketId,
    boundary: Region,
    /// Other siblings swallowed by the box; they become its children.
    absorbed: Vec<BucketId>,
    /// Part of the parent's count moving into the box.
    parent_share: f64,
    count: f64,
    penalty: f64,
}

impl SiblingMerge {
    pub(crate) fn evaluate(
        tree: &BucketTree,
        parent: BucketId,
        first: BucketId,
        second: BucketId,
    ) -> Self {
        let p = &tree.arena[parent];
        let (a, b) = (&tree.arena[first], &tree.arena[second]);

        let mut boundary = a.boundary.bounding_box(&b.boundary);
        let mut absorbed = Vec::new();
        let others: Vec<BucketId> = p
            .children
            .iter()
            .copied()
            .filter(|&s| s != first && s != second)
            .collect();
        // grow to a fixed point so no remaining sibling partially overlaps the box
        let mut changed = true;
        while changed {
            changed = false;
            for &sibling in &others {
                if absorbed.contains(&sibling) {
                    continue;
                }
                let sb = &tree.arena[sibling].boundary;
                if boundary.contains(sb) {
                    absorbed.push(sibling);
                    changed = true;
                } else if boundary.intersects(sb) {
                    boundary = boundary.bounding_box(sb);
                    absorbed.push(sibling);
                    changed = true;
                }
            }
        }

        let swallowed: f64 = absorbed
            .iter()
            .map(|&s| tree.arena[s].boundary.volume())
            .sum();
        let given_up =
            (boundary.volume() - a.boundary.volume() - b.boundary.volume() - swallowed).max(0.0);
        let parent_share = p.count * (given_up / tree.own_volume(parent)).min(1.0);
        let count = parent_share + a.count + b.count;

        let (va, vb) = (tree.own_volume(first), tree.own_volume(second));
        let merged_volume = given_up + va + vb;
        let penalty = if is_negligible(merged_volume, boundary.volume()) {
            0.0
        } else {
            (parent_share - count * given_up / merged_volume).abs()
                + (a.count - count * va / merged_volume).abs()
                + (b.count - count * vb / merged_volume).abs()
        };

        Self {
            parent,
            first,
            second,
            boundary,
            absorbed,
            parent_share,
            count,
            penalty,
        }
    }
}

impl MergeTrait for SiblingMerge {
    fn penalty(&self) -> f64 {
        self.penalty
    }

    fn forced(&self) -> bool {
        false
    }

    fn key(&self) -> MergeKey {
        MergeKey {
            kind: 2,
            parent: self.parent,
            first: self.first.min(self.second),
            second: Some(self.first.max(self.second)),
        }
    }

    fn apply(
        self,
        tree: &mut BucketTree,
        metrics: &mut RefineMetrics,
    ) -> Result<BucketId, InvariantViolation> {
        for id in [self.first, self.second].iter().chain(&self.absorbed) {
            if tree.arena.try_get(*id)?.parent != Some(self.parent) {
                return Err(InvariantViolation::StaleBucket(*id));
            }
        }

        let mut children = Vec::new();
        for id in [self.first, self.second] {
            children.extend_from_slice(&tree.arena[id].children);
        }
        children.extend_from_slice(&self.absorbed);

        let merged = tree.arena.insert(Bucket {
            children: children.clone(),
            ..Bucket::new(
                self.boundary,
                self.count,
                Some(self.parent),
                Provenance::SiblingMerge,
            )
        });
        for child in children {
            tree.arena[child].parent = Some(merged);
        }

        let parent = &mut tree.arena[self.parent];
        parent.children.retain(|&c| {
            c != self.first && c != self.second && !self.absorbed.contains(&c)
        });
        parent.children.push(merged);
        parent.count = (parent.count - self.parent_share).max(0.0);

        tree.release(self.first)?;
        tree.release(self.second)?;
        tree.touch(merged);
        tree.touch(self.parent);
        metrics.sibling_merges += 1;
        debug!(
            parent = %self.parent,
            first = %self.first,
            second = %self.second,
            merged = %merged,
            absorbed = self.absorbed.len(),
            penalty = self.penalty,
            "merged siblings"
        );
        Ok(merged)
    }
}

/// Cheapest merge among the children of `parent`, if it has any.
pub(crate) fn best_merge_for(tree: &BucketTree, parent: BucketId) -> Option<Merge> {
    let bucket = tree.arena.get(parent)?;
    let first = *bucket.children.first()?;
    if is_negligible(tree.own_volume(parent), bucket.boundary.volume()) {
        return Some(ParentChildMerge::degenerate(parent, first).into());
    }

    let mut best: Option<Merge> = None;
    let mut consider = |candidate: Merge| {
        if best
            .as_ref()
            .map_or(true, |b| candidate.rank(b) == Ordering::Less)
        {
            best = Some(candidate);
        }
    };
    for (i, &a) in bucket.children.iter().enumerate() {
        consider(ParentChildMerge::evaluate(tree, parent, a).into());
        for &b in &bucket.children[i + 1..] {
            consider(SiblingMerge::evaluate(tree, parent, a, b).into());
        }
    }
    best
}

impl BucketTree {
    /// Folds `child` into `parent`: counts add up and the child's children move to the parent.
    pub(crate) fn merge_into_parent(
        &mut self,
        parent: BucketId,
        child: BucketId,
        provenance: Provenance,
    ) -> Result<(), InvariantViolation> {
        if self.arena.try_get(child)?.parent != Some(parent) {
            return Err(InvariantViolation::StaleBucket(child));
        }
        self.arena.try_get(parent)?;

        let Bucket {
            count, children, ..
        } = self.release(child)?;
        for &grandchild in &children {
            self.arena[grandchild].parent = Some(parent);
        }
        let bucket = &mut self.arena[parent];
        bucket.count += count;
        bucket.children.retain(|&c| c != child);
        bucket.children.extend(children);
        if !bucket.is_root() {
            bucket.provenance = provenance;
        }
        self.touch(parent);
        Ok(())
    }

    /// Applies the cheapest merges until the tree is back within its budget.
    pub(crate) fn evict(&mut self, metrics: &mut RefineMetrics) -> Result<(), HistogramError> {
        while self.bucket_count() > self.bucket_budget() {
            let merge = self
                .select_merge()
                .ok_or(InvariantViolation::NoMergeCandidate(self.bucket_count()))?;
            merge.apply(self, metrics)?;
            self.debug_check()?;
        }
        Ok(())
    }

    /// Cheapest merge in the whole tree.
    pub(crate) fn select_merge(&mut self) -> Option<Merge> {
        if self.cache.is_some() {
            return self.select_cached();
        }
        self.select_by_scan()
    }

    pub(crate) fn select_by_scan(&self) -> Option<Merge> {
        self.buckets()
            .filter_map(|(id, _)| best_merge_for(self, id))
            .min_by(Merge::rank)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::snapshot::{BucketSnapshot, Snapshot};
    use crate::Config;

    fn bucket(boundary: &[[f64; 2]], count: f64, parent: Option<usize>, children: &[usize]) -> BucketSnapshot {
        BucketSnapshot {
            boundary: boundary.to_vec(),
            count,
            parent,
            children: children.to_vec(),
            provenance: if parent.is_none() {
                Provenance::Root
            } else {
                Provenance::Drill
            },
        }
    }

    /// Root `[0, 100]` with children `[10, 20]`, `[30, 40]` and `[50, 60]`.
    fn three_children() -> BucketTree {
        BucketTree::try_from(Snapshot {
            config: Config::new(["x"], 10).unwrap(),
            buckets: vec![
                bucket(&[[0.0, 100.0]], 70.0, None, &[1, 2, 3]),
                bucket(&[[10.0, 20.0]], 10.0, Some(0), &[]),
                bucket(&[[30.0, 40.0]], 10.0, Some(0), &[]),
                bucket(&[[50.0, 60.0]], 100.0, Some(0), &[]),
            ],
        })
        .unwrap()
    }

    fn child(tree: &BucketTree, i: usize) -> BucketId {
        tree.get(tree.root()).unwrap().children()[i]
    }

    #[test]
    fn test_parent_child_penalty() {
        let tree = three_children();
        let merge = ParentChildMerge::evaluate(&tree, tree.root(), child(&tree, 0));
        // own volumes 70 and 10, merged density 80 / 80
        assert_eq!(merge.penalty(), 0.0);
        let merge = ParentChildMerge::evaluate(&tree, tree.root(), child(&tree, 2));
        // merged count 170 over volume 80: |70 - 148.75| + |100 - 21.25|
        assert!((merge.penalty() - 157.5).abs() < 1e-9);
    }

    #[test]
    fn test_sibling_merge_absorbs_enclosed_sibling() {
        let tree = three_children();
        let merge = SiblingMerge::evaluate(&tree, tree.root(), child(&tree, 0), child(&tree, 2));
        assert_eq!(merge.boundary.ranges(), &[[10.0, 60.0]]);
        assert_eq!(merge.absorbed, vec![child(&tree, 1)]);
        // gives up [20, 30] and [40, 50] of the parent's 70 units of own volume
        assert!((merge.parent_share - 20.0).abs() < 1e-9);
        assert!((merge.count - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_scan_picks_zero_penalty_merge() {
        let tree = three_children();
        let merge = tree.select_by_scan().unwrap();
        assert_eq!(merge.penalty(), 0.0);
        assert_eq!(
            merge.key(),
            MergeKey {
                kind: 1,
                parent: tree.root(),
                first: child(&tree, 0),
                second: None,
            }
        );
    }

    #[test]
    fn test_apply_sibling_merge() {
        let mut tree = three_children();
        let mut metrics = RefineMetrics::default();
        let merge = SiblingMerge::evaluate(&tree, tree.root(), child(&tree, 0), child(&tree, 2));
        let merged = merge.apply(&mut tree, &mut metrics).unwrap();

        assert_eq!(tree.bucket_count(), 3);
        assert_eq!(metrics.sibling_merges, 1);
        let root = tree.get(tree.root()).unwrap();
        assert_eq!(root.children(), &[merged]);
        assert!((root.count() - 50.0).abs() < 1e-9);
        let merged = tree.get(merged).unwrap();
        assert_eq!(merged.provenance(), Provenance::SiblingMerge);
        assert_eq!(merged.children().len(), 1);
        assert!((tree.total_tuples() - 190.0).abs() < 1e-9);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_root_is_updated_in_place() {
        let mut tree = three_children();
        let root = tree.root();
        let removed = child(&tree, 2);
        let mut metrics = RefineMetrics::default();
        let kept = ParentChildMerge::evaluate(&tree, root, removed)
            .apply(&mut tree, &mut metrics)
            .unwrap();
        assert_eq!(kept, root);
        assert_eq!(tree.get(removed), None);
        let root = tree.get(root).unwrap();
        assert_eq!(root.count(), 170.0);
        assert_eq!(root.provenance(), Provenance::Root);
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn test_stale_merge_is_rejected() {
        let mut tree = three_children();
        let mut metrics = RefineMetrics::default();
        let merge = ParentChildMerge::evaluate(&tree, tree.root(), child(&tree, 0));
        merge.clone().apply(&mut tree, &mut metrics).unwrap();
        assert!(matches!(
            merge.apply(&mut tree, &mut metrics),
            Err(InvariantViolation::StaleBucket(_))
        ));
    }

    #[test]
    fn test_rank_prefers_forced_then_penalty_then_key() {
        let tree = three_children();
        let (root, a, b) = (tree.root(), child(&tree, 0), child(&tree, 1));
        let forced: Merge = ParentChildMerge::degenerate(root, b).into();
        let cheap: Merge = ParentChildMerge::evaluate(&tree, root, a).into();
        let tied: Merge = ParentChildMerge::evaluate(&tree, root, b).into();
        assert_eq!(forced.rank(&cheap), Ordering::Less);
        assert_eq!(cheap.penalty(), tied.penalty());
        assert_eq!(cheap.rank(&tied), Ordering::Less);
        assert_eq!(tied.rank(&cheap), Ordering::Greater);
    }
}
