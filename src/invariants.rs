//! Structural invariants of the bucket tree.
//!
//! Checked after every absorbed observation and every applied merge in debug builds (or with the
//! `invariants` feature), and on every tree rebuilt from a snapshot.

use crate::error::InvariantViolation;
use crate::region::{is_negligible, EPSILON};
use crate::tree::BucketTree;

impl BucketTree {
    /// Verifies containment, sibling disjointness, parent links, reachability and non-negativity.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut reachable = 0;
        let mut stack = vec![(self.root, None)];
        while let Some((id, listed_under)) = stack.pop() {
            let bucket = self.arena.try_get(id)?;
            reachable += 1;
            if reachable > self.arena.len() {
                break;
            }

            if bucket.parent != listed_under {
                return Err(InvariantViolation::ParentMismatch {
                    child: id,
                    listed_under,
                    parent: bucket.parent,
                });
            }
            if !(bucket.count >= 0.0) || !bucket.count.is_finite() {
                return Err(InvariantViolation::NegativeCount {
                    bucket: id,
                    count: bucket.count,
                });
            }

            let volume = bucket.boundary.volume();
            for (i, &child) in bucket.children.iter().enumerate() {
                let boundary = &self.arena.try_get(child)?.boundary;
                if !bucket.boundary.contains(boundary) {
                    return Err(InvariantViolation::ChildOutsideParent { parent: id, child });
                }
                for &other in &bucket.children[i + 1..] {
                    let overlap = boundary.intersection_volume(&self.arena.try_get(other)?.boundary);
                    if overlap > EPSILON * volume {
                        return Err(InvariantViolation::OverlappingSiblings {
                            parent: id,
                            first: child,
                            second: other,
                        });
                    }
                }
                stack.push((child, Some(id)));
            }

            let own = self.own_volume(id);
            if own < 0.0 && !is_negligible(-own, volume) {
                return Err(InvariantViolation::NegativeOwnVolume { bucket: id, volume: own });
            }
        }

        if reachable != self.arena.len() {
            return Err(InvariantViolation::Unreachable {
                reachable,
                stored: self.arena.len(),
            });
        }
        Ok(())
    }

    /// Verifies the bucket budget, which only has to hold between observations.
    pub fn check_budget(&self) -> Result<(), InvariantViolation> {
        if self.bucket_count() > self.bucket_budget() {
            return Err(InvariantViolation::BudgetExceeded {
                count: self.bucket_count(),
                budget: self.bucket_budget(),
            });
        }
        Ok(())
    }
}
