//! Buckets and the arena that owns them.
//!
//! The tree never holds references between buckets. Children are a list of [`BucketId`]s and the
//! parent is a plain id, so re-parenting during drills and merges is an index rewrite. Ids carry a
//! generation that is bumped whenever a slot is freed, which turns a use of a merged-away bucket into
//! a detectable [`InvariantViolation::StaleBucket`] instead of a silent alias.

use std::fmt::{Display, Formatter};
use std::ops::{Index, IndexMut};

use crate::error::InvariantViolation;
use crate::region::Region;

/// Generational handle of a bucket inside a [`crate::BucketTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId {
    index: u32,
    generation: u32,
}

impl BucketId {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Display for BucketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// How a bucket came to be. Only used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Provenance {
    Root,
    Drill,
    SiblingMerge,
    ParentMerge,
}

/// A node of the bucket tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub(crate) boundary: Region,
    /// Tuples attributed to the bucket's own region, excluding its children.
    pub(crate) count: f64,
    pub(crate) children: Vec<BucketId>,
    pub(crate) parent: Option<BucketId>,
    pub(crate) provenance: Provenance,
}

impl Bucket {
    pub(crate) fn new(
        boundary: Region,
        count: f64,
        parent: Option<BucketId>,
        provenance: Provenance,
    ) -> Self {
        Self {
            boundary,
            count,
            children: Vec::new(),
            parent,
            provenance,
        }
    }

    #[inline]
    pub fn boundary(&self) -> &Region {
        &self.boundary
    }

    #[inline]
    pub fn count(&self) -> f64 {
        self.count
    }

    #[inline]
    pub fn children(&self) -> &[BucketId] {
        &self.children
    }

    #[inline]
    pub fn parent(&self) -> Option<BucketId> {
        self.parent
    }

    #[inline]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    bucket: Option<Bucket>,
}

/// Slot storage for buckets. Freed slots are reused last-in first-out.
#[derive(Debug, Clone, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub(crate) fn insert(&mut self, bucket: Bucket) -> BucketId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.bucket = Some(bucket);
            return BucketId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            bucket: Some(bucket),
        });
        BucketId {
            index,
            generation: 0,
        }
    }

    /// Frees the slot of `id`, returning the bucket it held.
    pub(crate) fn remove(&mut self, id: BucketId) -> Result<Bucket, InvariantViolation> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .ok_or(InvariantViolation::StaleBucket(id))?;
        let bucket = slot.bucket.take().ok_or(InvariantViolation::StaleBucket(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Ok(bucket)
    }

    #[inline]
    pub(crate) fn get(&self, id: BucketId) -> Option<&Bucket> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.bucket.as_ref())
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: BucketId) -> Option<&mut Bucket> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.bucket.as_mut())
    }

    /// Like [`Arena::get`], for callers holding ids that may have been merged away.
    #[inline]
    pub(crate) fn try_get(&self, id: BucketId) -> Result<&Bucket, InvariantViolation> {
        self.get(id).ok_or(InvariantViolation::StaleBucket(id))
    }

    #[inline]
    pub(crate) fn contains(&self, id: BucketId) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Index<BucketId> for Arena {
    type Output = Bucket;

    /// Panics on stale ids; only used with ids read from live buckets.
    fn index(&self, id: BucketId) -> &Bucket {
        match self.get(id) {
            Some(bucket) => bucket,
            None => panic!("stale bucket id {id}"),
        }
    }
}

impl IndexMut<BucketId> for Arena {
    fn index_mut(&mut self, id: BucketId) -> &mut Bucket {
        match self.get_mut(id) {
            Some(bucket) => bucket,
            None => panic!("stale bucket id {id}"),
        }
    }
}
