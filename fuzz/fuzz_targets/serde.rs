#![no_main]

use libfuzzer_sys::fuzz_target;
use stholes::BucketTree;

fuzz_target!(|data: &[u8]| {
    if let Ok(mut tree) = serde_json::from_slice::<BucketTree>(data) {
        assert!(tree.check_invariants().is_ok());
        assert!(tree.bucket_count() <= tree.bucket_budget());

        let Some(extent) = tree.root_boundary().map(|r| r.ranges().to_vec()) else {
            return;
        };
        let count = tree.total_tuples();
        if tree.refine([(extent, count)]).is_ok() {
            assert!(tree.check_invariants().is_ok());
        }
    }
});
