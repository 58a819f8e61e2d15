#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use criterion::measurement::WallTime;
use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput,
};
use pprof::criterion::{Output, PProfProfiler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stholes::{mean_absolute_error, BucketTree, Config, Dataset, Observation, WorkloadGenerator};
use tabled::settings::{Settings, Style};
use tabled::{Table, Tabled};

/// Refine and estimate operations are benchmarked against bucket budgets ranging from 1 to
/// `DEFAULT_MAX_BUDGET` or environment variable `N` (if defined), doubled with every iteration.
const DEFAULT_MAX_BUDGET: usize = 256;

/// Observations fed to every tree.
const OBSERVATIONS: usize = 500;

criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(PProfProfiler::new(100, Output::Protobuf));
    targets = benchmark
}
criterion_main!(benches);

fn benchmark(c: &mut Criterion) {
    let bench_results_path = std::env::var("BENCH_RESULTS_PATH").unwrap();
    let max_budget = std::env::var("N")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_BUDGET);

    let budgets: Vec<usize> = (0..)
        .map(|c| 1 << c)
        .take_while(|&c| c <= max_budget)
        .collect();

    let mut rng = StdRng::seed_from_u64(12345);
    let dataset = clustered_dataset(&mut rng);
    let generator = WorkloadGenerator::new(0.05).unwrap();
    let workload = generator.generate(&dataset, OBSERVATIONS, &mut rng);
    let queries = generator.generate(&dataset, 100, &mut rng);

    let mut group = c.benchmark_group("refine");
    group.throughput(Throughput::Elements(OBSERVATIONS as u64));
    for &budget in &budgets {
        bench_refine(&mut group, Eviction::PenaltyCache, budget, &workload);
        bench_refine(&mut group, Eviction::FullScan, budget, &workload);
    }
    group.finish();

    let mut group = c.benchmark_group("estimate");
    group.throughput(Throughput::Elements(queries.len() as u64));
    for &budget in &budgets {
        bench_estimate(&mut group, budget, &workload, &queries);
    }
    group.finish();

    let results: Vec<StatRecord> = budgets
        .iter()
        .map(|&budget| StatRecord {
            budget,
            penalty_cache: measure_allocations(Eviction::PenaltyCache, budget, &workload),
            full_scan: measure_allocations(Eviction::FullScan, budget, &workload),
        })
        .collect();

    let table_config = Settings::default().with(Style::markdown());
    std::fs::write(
        format!("{}/memory_usage.md", bench_results_path),
        Table::new(results).with(table_config).to_string(),
    )
    .unwrap();

    let results: Vec<ErrorRecord> = budgets
        .iter()
        .map(|&budget| ErrorRecord {
            budget,
            mean_absolute_error: measure_error(budget, &workload, &queries),
        })
        .collect();

    let table_config = Settings::default().with(Style::markdown());
    std::fs::write(
        format!("{}/mean_absolute_error.md", bench_results_path),
        Table::new(results).with(table_config).to_string(),
    )
    .unwrap();
}

#[derive(Clone, Copy)]
enum Eviction {
    PenaltyCache,
    FullScan,
}

impl Eviction {
    fn tree(self, budget: usize) -> BucketTree {
        let config = Config::new(["x", "y"], budget)
            .unwrap()
            .with_penalty_cache(matches!(self, Eviction::PenaltyCache));
        BucketTree::with_config(config).unwrap()
    }

    fn name(self) -> &'static str {
        match self {
            Eviction::PenaltyCache => "penalty-cache",
            Eviction::FullScan => "full-scan",
        }
    }
}

/// Two dense gaussian-ish clusters over a sparse uniform background.
fn clustered_dataset(rng: &mut StdRng) -> Dataset {
    let mut dataset = Dataset::new(2).unwrap();
    for i in 0..5_000 {
        let point = match i % 5 {
            0 | 1 => {
                let spread: f64 = rng.gen_range(0.0..8.0);
                [20.0 + rng.gen_range(-spread..=spread), 30.0 + rng.gen_range(-spread..=spread)]
            }
            2 => [70.0 + rng.gen_range(-5.0..5.0), 75.0 + rng.gen_range(-5.0..5.0)],
            _ => [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)],
        };
        dataset.push(&point).unwrap();
    }
    dataset
}

fn bench_refine(
    group: &mut BenchmarkGroup<WallTime>,
    eviction: Eviction,
    budget: usize,
    workload: &[Observation],
) {
    group.bench_with_input(
        BenchmarkId::new(eviction.name(), budget),
        &budget,
        |b, &budget| {
            b.iter(|| {
                let mut tree = eviction.tree(budget);
                tree.refine(black_box(workload).iter().cloned()).unwrap();
            });
        },
    );
}

fn bench_estimate(
    group: &mut BenchmarkGroup<WallTime>,
    budget: usize,
    workload: &[Observation],
    queries: &[Observation],
) {
    group.bench_with_input(BenchmarkId::new("estimate", budget), &budget, |b, &budget| {
        let mut tree = Eviction::PenaltyCache.tree(budget);
        tree.refine(workload.iter().cloned()).unwrap();
        b.iter(|| {
            for query in queries {
                black_box(tree.estimate_region(black_box(&query.region)).unwrap());
            }
        });
    });
}

fn measure_allocations(eviction: Eviction, budget: usize, workload: &[Observation]) -> String {
    let _profiler = dhat::Profiler::builder().testing().build();
    let mut tree = eviction.tree(budget);
    tree.refine(workload.iter().cloned()).unwrap();
    let stats = dhat::HeapStats::get();
    format!(
        "{} / {} / {}",
        stats.curr_bytes, stats.total_bytes, stats.total_blocks,
    )
}

fn measure_error(budget: usize, workload: &[Observation], queries: &[Observation]) -> String {
    let mut tree = Eviction::PenaltyCache.tree(budget);
    tree.refine(workload.iter().cloned()).unwrap();
    let error = mean_absolute_error(&tree, queries).unwrap();
    format!("{:.2}", error)
}

#[derive(Tabled)]
struct StatRecord {
    budget: usize,
    penalty_cache: String,
    full_scan: String,
}

#[derive(Tabled)]
struct ErrorRecord {
    budget: usize,
    mean_absolute_error: String,
}
