#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stholes::{BucketTree, Config};
use tabled::{
    settings::{Settings, Style},
    Table, Tabled,
};

#[derive(Tabled)]
struct Record {
    budget: usize,
    observations: usize,
    penalty_cache: String,
    full_scan: String,
}

fn workload(observations: usize) -> Vec<(Vec<[f64; 2]>, f64)> {
    let mut rng = StdRng::seed_from_u64(12345);
    (0..observations)
        .map(|_| {
            let region = (0..2)
                .map(|_| {
                    let low: f64 = rng.gen_range(0.0..100.0);
                    [low, (low + rng.gen_range(1.0..30.0)).min(100.0)]
                })
                .collect();
            (region, f64::from(rng.gen_range(0u32..1000)))
        })
        .collect()
}

fn measure_memory_usage(budget: usize, penalty_cache: bool, workload: &[(Vec<[f64; 2]>, f64)]) -> String {
    let _profiler = dhat::Profiler::builder().testing().build();
    let config = Config::new(["x", "y"], budget)
        .unwrap()
        .with_penalty_cache(penalty_cache);
    let mut tree = BucketTree::with_config(config).unwrap();
    tree.refine(workload.iter().cloned()).unwrap();
    let stats = dhat::HeapStats::get();
    format!(
        "{} / {} / {} / {}",
        tree.bucket_count(),
        stats.curr_bytes,
        stats.total_bytes,
        stats.total_blocks
    )
}

#[test]
fn test_allocations() {
    let results: Vec<Record> = [4, 16]
        .into_iter()
        .flat_map(|budget| [10, 100].into_iter().map(move |n| (budget, n)))
        .map(|(budget, observations)| {
            let workload = workload(observations);
            Record {
                budget,
                observations,
                penalty_cache: measure_memory_usage(budget, true, &workload),
                full_scan: measure_memory_usage(budget, false, &workload),
            }
        })
        .collect();

    let table_config = Settings::default().with(Style::markdown());
    let markdown = Table::new(results).with(table_config).to_string();
    std::fs::write(format!("{}/target/memory_allocations.md", env!("CARGO_MANIFEST_DIR")), &markdown).unwrap();
    println!("{}", markdown);
}
