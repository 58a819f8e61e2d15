//! Cardinality estimation over the bucket tree.
//!
//! Every bucket assumes its tuples are spread uniformly over its own region, so its contribution to
//! a query is `count * own_intersection / own_volume`. The estimate of a query is the sum of the
//! contributions of all buckets it touches.

use std::collections::HashSet;

use crate::bucket::BucketId;
use crate::error::{HistogramError, InvariantViolation};
use crate::region::{is_negligible, Region};
use crate::tree::BucketTree;

impl BucketTree {
    /// Estimates how many tuples fall inside `region`, given as one range per entry of `attributes`.
    ///
    /// Attributes may be any subset of the tree's attributes in any order; the ones not named are
    /// unconstrained. An empty attribute list therefore estimates the whole tree.
    pub fn estimate<S: AsRef<str>>(
        &self,
        region: &[[f64; 2]],
        attributes: &[S],
    ) -> Result<f64, HistogramError> {
        if region.len() != attributes.len() {
            return Err(HistogramError::DimensionMismatch {
                expected: attributes.len(),
                found: region.len(),
            });
        }
        if !region.is_empty() {
            Region::new(region.to_vec())?;
        }

        let mut dims = Vec::with_capacity(attributes.len());
        let mut seen = HashSet::with_capacity(attributes.len());
        for name in attributes {
            let name = name.as_ref();
            if !seen.insert(name) {
                return Err(HistogramError::DuplicateAttribute(name.to_string()));
            }
            dims.push(self.config().attribute_index(name)?);
        }

        let Some(extent) = self.root_boundary() else {
            return Ok(0.0);
        };
        let mut ranges = extent.ranges().to_vec();
        for (&dim, &range) in dims.iter().zip(region) {
            ranges[dim] = range;
        }
        let query = Region::new(ranges)?;
        Ok(self.estimate_within(self.root, &query)?)
    }

    /// Estimates `region` given as one range per attribute, in attribute order.
    pub fn estimate_region(&self, region: &[[f64; 2]]) -> Result<f64, HistogramError> {
        let query = self.validate_region(region)?;
        if self.root_boundary().is_none() {
            return Ok(0.0);
        }
        Ok(self.estimate_within(self.root, &query)?)
    }

    /// Estimate of `query` restricted to the subtree rooted at `start`.
    pub(crate) fn estimate_within(
        &self,
        start: BucketId,
        query: &Region,
    ) -> Result<f64, InvariantViolation> {
        let mut total = 0.0;
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let bucket = self.arena.try_get(id)?;
            if !bucket.boundary.intersects(query) {
                continue;
            }
            let own = self.own_volume(id);
            if !is_negligible(own, bucket.boundary.volume()) {
                let inside = self.own_intersection_volume(id, query).min(own);
                total += bucket.count * (inside / own);
            }
            stack.extend_from_slice(&bucket.children);
        }
        if total < 0.0 {
            return Err(InvariantViolation::NegativeEstimate(total));
        }
        Ok(total)
    }
}
