#![no_main]

use libfuzzer_sys::fuzz_target;
use stholes::BucketTree;
use wyhash::wyhash;

const ATTRIBUTES: [&str; 3] = ["a", "b", "c"];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let seed = wyhash(data, 0) as usize;
    let dims = seed % ATTRIBUTES.len() + 1;
    let budget = (seed >> 8) % 16 + 1;
    let mut tree = BucketTree::new(ATTRIBUTES.into_iter().take(dims), budget).unwrap();

    // every observation takes one (low, width) byte pair per attribute and one count byte
    for chunk in data.chunks_exact(2 * dims + 1) {
        let region: Vec<[f64; 2]> = chunk[..2 * dims]
            .chunks_exact(2)
            .map(|pair| {
                let low = f64::from(pair[0]);
                [low, low + f64::from(pair[1] % 64)]
            })
            .collect();
        let count = f64::from(chunk[2 * dims]) * 10.0;

        tree.refine([(region.clone(), count)]).unwrap();
        assert!(tree.bucket_count() <= budget);
        assert!(tree.estimate_region(&region).unwrap() >= 0.0);
    }

    if let Some(extent) = tree.root_boundary() {
        let estimate = tree.estimate_region(extent.ranges()).unwrap();
        let total = tree.total_tuples();
        assert!((estimate - total).abs() <= 1e-6 * total.max(1.0));
    }
});
