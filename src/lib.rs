//! `stholes` is a Rust crate implementing the STHoles bucket tree, a multidimensional histogram that
//! estimates how many tuples fall inside a hyper-rectangular range query.
//!
//! The histogram never scans the data. It learns from query feedback: every executed query reports its
//! region and true result size, and the tree carves nested buckets ("holes") where its estimate was
//! wrong, merging the least informative buckets whenever it outgrows its bucket budget.
mod bucket;
mod cache;
mod config;
mod error;
mod estimate;
mod invariants;
mod merge;
mod metrics;
mod refine;
mod region;
#[cfg(feature = "with_serde")]
mod serde;
mod snapshot;
pub mod tree;
mod workload;

pub use bucket::{Bucket, BucketId, Provenance};
pub use config::Config;
pub use error::{HistogramError, InvariantViolation};
pub use metrics::RefineMetrics;
pub use region::Region;
pub use snapshot::{BucketSnapshot, Snapshot};
pub use tree::BucketTree;
pub use workload::{
    mean_absolute_error, Dataset, Observation, ProjectedQuery, WorkloadGenerator,
};
