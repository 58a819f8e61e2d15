//! Memoized best merge per parent bucket.
//!
//! The best merge among a bucket's children depends only on that bucket, its children and their
//! children's volumes. Any change to a bucket therefore invalidates at most its own entry and its
//! parent's, which is exactly what [`BucketTree::touch`] marks dirty.

use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

use tracing::trace;
use wyhash::WyHash;

use crate::bucket::BucketId;
use crate::merge::{best_merge_for, Merge};
use crate::tree::BucketTree;

pub(crate) type BuildWyHash = BuildHasherDefault<WyHash>;

#[derive(Debug, Clone, Default)]
pub(crate) struct PenaltyCache {
    best: HashMap<BucketId, Merge, BuildWyHash>,
    dirty: HashSet<BucketId, BuildWyHash>,
}

impl PenaltyCache {
    #[inline]
    pub(crate) fn mark(&mut self, id: BucketId) {
        self.dirty.insert(id);
    }

    /// Drops everything known about a bucket that left the tree.
    #[inline]
    pub(crate) fn forget(&mut self, id: BucketId) {
        self.best.remove(&id);
        self.dirty.remove(&id);
    }

    fn take_dirty(&mut self) -> Vec<BucketId> {
        self.dirty.drain().collect()
    }

    fn store(&mut self, id: BucketId, merge: Option<Merge>) {
        match merge {
            Some(merge) => self.best.insert(id, merge),
            None => self.best.remove(&id),
        };
    }

    fn best(&self) -> Option<&Merge> {
        self.best.values().min_by(|a, b| a.rank(b))
    }

    #[cfg(test)]
    pub(crate) fn is_clean(&self) -> bool {
        self.dirty.is_empty()
    }
}

impl BucketTree {
    /// Recomputes the dirty entries and returns the cheapest cached merge.
    pub(crate) fn select_cached(&mut self) -> Option<Merge> {
        let dirty = self.cache.as_mut()?.take_dirty();
        let fresh: Vec<(BucketId, Option<Merge>)> = dirty
            .into_iter()
            .filter(|&id| self.arena.contains(id))
            .map(|id| (id, best_merge_for(self, id)))
            .collect();
        trace!(refreshed = fresh.len(), "penalty cache refresh");

        let cache = self.cache.as_mut()?;
        for (id, merge) in fresh {
            cache.store(id, merge);
        }
        cache.best().cloned()
    }
}
