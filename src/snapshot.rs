//! Flat, index-linked image of a bucket tree.
//!
//! A [`Snapshot`] lists the buckets in pre-order with the root at index 0 and links parents and
//! children by position. It is what the `with_serde` feature serializes, and the only way to rebuild
//! a tree from outside the crate: [`BucketTree::try_from`] validates every link and invariant before
//! handing the tree out.

use std::collections::HashMap;

use crate::bucket::{Arena, Bucket, BucketId, Provenance};
use crate::cache::BuildWyHash;
use crate::config::Config;
use crate::error::HistogramError;
use crate::region::Region;
use crate::tree::BucketTree;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub config: Config,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BucketSnapshot {
    /// One `[low, high]` range per attribute; empty only for the root of an untrained tree.
    pub boundary: Vec<[f64; 2]>,
    pub count: f64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub provenance: Provenance,
}

impl BucketTree {
    /// Captures the tree in pre-order.
    pub fn snapshot(&self) -> Snapshot {
        let order: HashMap<BucketId, usize, BuildWyHash> = self
            .buckets()
            .enumerate()
            .map(|(index, (id, _))| (id, index))
            .collect();
        let position = |id: BucketId| order.get(&id).copied();

        let buckets = self
            .buckets()
            .map(|(_, bucket)| BucketSnapshot {
                boundary: bucket.boundary.ranges().to_vec(),
                count: bucket.count,
                parent: bucket.parent.and_then(position),
                children: bucket.children.iter().filter_map(|&c| position(c)).collect(),
                provenance: bucket.provenance,
            })
            .collect();

        Snapshot {
            config: self.config().clone(),
            buckets,
        }
    }
}

fn invalid(reason: impl Into<String>) -> HistogramError {
    HistogramError::InvalidSnapshot(reason.into())
}

/// Checks the index links: a single root at 0, every other bucket listed by exactly its parent, all
/// of them reachable.
fn check_links(buckets: &[BucketSnapshot]) -> Result<(), HistogramError> {
    let root = buckets.first().ok_or_else(|| invalid("no buckets"))?;
    if root.parent.is_some() {
        return Err(invalid("bucket 0 must be the root"));
    }

    let mut listed = vec![false; buckets.len()];
    listed[0] = true;
    for (index, bucket) in buckets.iter().enumerate() {
        if index > 0 && bucket.parent.is_none() {
            return Err(invalid(format!("bucket {index} has no parent")));
        }
        for &child in &bucket.children {
            let entry = buckets
                .get(child)
                .ok_or_else(|| invalid(format!("bucket {index} lists missing child {child}")))?;
            if entry.parent != Some(index) {
                return Err(invalid(format!(
                    "bucket {child} is listed under {index} but points at {:?}",
                    entry.parent
                )));
            }
            if std::mem::replace(&mut listed[child], true) {
                return Err(invalid(format!("bucket {child} is listed twice")));
            }
        }
    }
    if let Some(orphan) = listed.iter().position(|&seen| !seen) {
        return Err(invalid(format!("bucket {orphan} is not listed by its parent")));
    }

    // every bucket listed once with matching parents; rule out cycles detached from the root
    let mut reachable = 0;
    let mut stack = vec![0];
    while let Some(index) = stack.pop() {
        reachable += 1;
        if reachable > buckets.len() {
            break;
        }
        stack.extend_from_slice(&buckets[index].children);
    }
    if reachable != buckets.len() {
        return Err(invalid("buckets are not all reachable from the root"));
    }
    Ok(())
}

impl TryFrom<Snapshot> for BucketTree {
    type Error = HistogramError;

    fn try_from(snapshot: Snapshot) -> Result<Self, Self::Error> {
        let Snapshot { config, buckets } = snapshot;
        config.validate()?;
        check_links(&buckets)?;
        if buckets.len() > config.bucket_budget() {
            return Err(invalid(format!(
                "{} buckets exceed the budget of {}",
                buckets.len(),
                config.bucket_budget()
            )));
        }

        let mut arena = Arena::default();
        let mut ids = Vec::with_capacity(buckets.len());
        for (index, bucket) in buckets.iter().enumerate() {
            let boundary = if bucket.boundary.is_empty() {
                if buckets.len() > 1 || bucket.count != 0.0 {
                    return Err(invalid(format!("bucket {index} has no boundary")));
                }
                Region::empty()
            } else {
                if bucket.boundary.len() != config.dims() {
                    return Err(HistogramError::DimensionMismatch {
                        expected: config.dims(),
                        found: bucket.boundary.len(),
                    });
                }
                Region::new(bucket.boundary.clone())?
            };
            if !bucket.count.is_finite() || bucket.count < 0.0 {
                return Err(HistogramError::InvalidCount(bucket.count));
            }
            ids.push(arena.insert(Bucket::new(boundary, bucket.count, None, bucket.provenance)));
        }

        for (bucket, &id) in buckets.iter().zip(&ids) {
            let entry = &mut arena[id];
            entry.parent = bucket.parent.map(|parent| ids[parent]);
            entry.children = bucket.children.iter().map(|&child| ids[child]).collect();
        }

        let tree = BucketTree::from_parts(config, arena, ids[0]);
        tree.check_invariants()
            .map_err(|violation| invalid(violation.to_string()))?;
        Ok(tree)
    }
}
