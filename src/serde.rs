//! # Serde module for BucketTree
//!
//! This module provides serde-based (serialization and deserialization) features for
//! `BucketTree`.
//!
//! The arena, generational ids and penalty cache are implementation details, so a tree is
//! serialized as its [`Snapshot`]: the config plus the buckets in pre-order, linked by position.
//!
//! Deserialization goes through `BucketTree::try_from(Snapshot)`, which rejects broken links,
//! malformed boundaries and any violated tree invariant, so a deserialized tree is as sound as one
//! built by refinement. The penalty cache is rebuilt lazily on the first eviction.
//!
//! Refer to the serde documentation for more details on custom serialization and deserialization:
//! - [Serialization](https://serde.rs/impl-serialize.html)
//! - [Deserialization](https://serde.rs/impl-deserialize.html)
use serde::de::Error;
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::tree::BucketTree;

impl Serialize for BucketTree {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BucketTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let snapshot = Snapshot::deserialize(deserializer)?;
        BucketTree::try_from(snapshot).map_err(|e| Error::custom(format!("{:?}", e)))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::Config;
    use test_case::test_case;

    #[test_case(0; "untrained tree")]
    #[test_case(1; "single observation")]
    #[test_case(5; "few observations")]
    #[test_case(100; "over budget")]
    fn test_serde(n: usize) {
        let config = Config::new(["x", "y"], 8).unwrap();
        let mut original_tree = BucketTree::with_config(config).unwrap();

        for i in 0..n {
            let low = (i * 7 % 90) as f64;
            let region = vec![[low, low + 10.0], [0.0, (i % 5 + 1) as f64 * 20.0]];
            original_tree.refine([(region, (i % 13) as f64 * 10.0)]).unwrap();
        }

        let serialized = serde_json::to_string(&original_tree).expect("serialization failed");
        assert!(
            !serialized.is_empty(),
            "serialized string should not be empty"
        );

        let deserialized_tree: BucketTree =
            serde_json::from_str(&serialized).expect("deserialization failed");

        assert_eq!(original_tree, deserialized_tree);
        assert_eq!(
            original_tree.estimate_region(&[[0.0, 50.0], [0.0, 50.0]]),
            deserialized_tree.estimate_region(&[[0.0, 50.0], [0.0, 50.0]])
        );
    }

    #[test]
    fn test_deserialized_tree_keeps_refining() {
        let mut tree = BucketTree::new(["x"], 3).unwrap();
        tree.refine([(vec![[0.0, 100.0]], 100.0), (vec![[10.0, 20.0]], 60.0)])
            .unwrap();
        let serialized = serde_json::to_string(&tree).unwrap();

        let mut deserialized: BucketTree = serde_json::from_str(&serialized).unwrap();
        let workload = [(vec![[50.0, 60.0]], 5.0), (vec![[80.0, 90.0]], 1.0)];
        tree.refine(workload.clone()).unwrap();
        deserialized.refine(workload).unwrap();
        assert_eq!(tree, deserialized);
    }

    #[test]
    fn test_deserialize_invalid_json() {
        let invalid_json = "{ invalid_json_string }";
        let result: Result<BucketTree, _> = serde_json::from_str(invalid_json);

        assert!(
            result.is_err(),
            "Deserialization should fail for invalid JSON"
        );
    }

    #[test_case(r#"{"config":{"attributes":[],"bucket_budget":3,"penalty_cache":true},"buckets":[{"boundary":[],"count":0.0,"parent":null,"children":[],"provenance":"Root"}]}"#.as_bytes(); "no attributes")]
    #[test_case(r#"{"config":{"attributes":["x"],"bucket_budget":3,"penalty_cache":true},"buckets":[]}"#.as_bytes(); "no buckets")]
    #[test_case(r#"{"config":{"attributes":["x"],"bucket_budget":3,"penalty_cache":true},"buckets":[{"boundary":[[0.0,1.0]],"count":1.0,"parent":null,"children":[1],"provenance":"Root"},{"boundary":[[0.5,2.0]],"count":1.0,"parent":0,"children":[],"provenance":"Drill"}]}"#.as_bytes(); "child outside parent")]
    #[test_case(r#"{"config":{"attributes":["x"],"bucket_budget":3,"penalty_cache":true},"buckets":[{"boundary":[[2.0,1.0]],"count":1.0,"parent":null,"children":[],"provenance":"Root"}]}"#.as_bytes(); "inverted range")]
    #[test_case(&[91, 49, 55, 44, 13, 10, 91, 13, 93, 93]; "case 2")]
    #[test_case(&[91, 51, 44, 10, 110, 117, 108, 108, 93, 122]; "case 3")]
    fn test_failed_deserialization(input: &[u8]) {
        let result: Result<BucketTree, _> = serde_json::from_slice(input);
        assert!(result.is_err());
    }
}
