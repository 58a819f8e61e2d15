//! Error types.
//!
//! [`HistogramError`] covers bad input and is always reported before the tree is touched.
//! [`InvariantViolation`] is a bug in the shrink, drill or merge logic; it aborts the current
//! observation and is surfaced through [`HistogramError::Invariant`].

use thiserror::Error;

use crate::bucket::BucketId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistogramError {
    #[error("histogram needs at least one attribute")]
    NoAttributes,
    #[error("bucket budget must be positive")]
    InvalidBudget,
    #[error("expected {expected} ranges, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),
    #[error("attribute `{0}` is listed more than once")]
    DuplicateAttribute(String),
    #[error("range {index} [{low}, {high}] must be finite with low <= high")]
    InvalidRange { index: usize, low: f64, high: f64 },
    #[error("true count {0} must be finite and non-negative")]
    InvalidCount(f64),
    #[error("value {value} of point {row} is not finite")]
    InvalidPoint { row: usize, value: f64 },
    #[error("volume fraction {0} must lie in (0, 1]")]
    InvalidVolumeFraction(f64),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("bucket tree invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("bucket {0} is not in the tree")]
    StaleBucket(BucketId),
    #[error("child {child} of {parent} is not contained in its parent")]
    ChildOutsideParent { parent: BucketId, child: BucketId },
    #[error("children {first} and {second} of {parent} overlap")]
    OverlappingSiblings {
        parent: BucketId,
        first: BucketId,
        second: BucketId,
    },
    #[error("bucket {child} is listed under {listed_under:?} but points at {parent:?}")]
    ParentMismatch {
        child: BucketId,
        listed_under: Option<BucketId>,
        parent: Option<BucketId>,
    },
    #[error("{reachable} buckets reachable from the root but {stored} stored")]
    Unreachable { reachable: usize, stored: usize },
    #[error("bucket {bucket} has negative count {count}")]
    NegativeCount { bucket: BucketId, count: f64 },
    #[error("bucket {bucket} has negative own volume {volume}")]
    NegativeOwnVolume { bucket: BucketId, volume: f64 },
    #[error("{count} buckets exceed the budget of {budget}")]
    BudgetExceeded { count: usize, budget: usize },
    #[error("drill target {hole:?} is not contained in bucket {bucket}")]
    DrillOutsideParent { bucket: BucketId, hole: Vec<[f64; 2]> },
    #[error("shrunk hole of bucket {bucket} still partially overlaps child {child}")]
    HoleOverlapsChild { bucket: BucketId, child: BucketId },
    #[error("estimate {0} is negative")]
    NegativeEstimate(f64),
    #[error("budget exceeded with {0} buckets but no merge is possible")]
    NoMergeCandidate(usize),
}
