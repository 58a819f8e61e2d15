use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stholes::{mean_absolute_error, BucketTree, Dataset, WorkloadGenerator};

fn main() {
    tracing_subscriber::fmt::init();

    let mut rng = StdRng::seed_from_u64(12345);
    let mut dataset = Dataset::new(2).unwrap();
    for i in 0..2_000 {
        let point = if i % 2 == 0 {
            [rng.gen_range(20.0..30.0), rng.gen_range(60.0..70.0)]
        } else {
            [rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)]
        };
        dataset.push(&point).unwrap();
    }

    let generator = WorkloadGenerator::new(0.05).unwrap();
    let mut tree = BucketTree::new(["x", "y"], 50).unwrap();
    let metrics = tree.train(&dataset, 200, &generator, &mut rng).unwrap();
    println!("trained: {:?}", tree);
    println!(
        "observations = {}, drills = {}, evictions = {}",
        metrics.observations,
        metrics.drills,
        metrics.evictions()
    );

    let queries = generator.generate(&dataset, 100, &mut rng);
    println!(
        "mean absolute error = {:.2}",
        mean_absolute_error(&tree, &queries).unwrap()
    );

    let cluster = [[20.0, 30.0], [60.0, 70.0]];
    println!("estimate in cluster = {:.1}", tree.estimate_region(&cluster).unwrap());
    println!("estimate for x in [20, 30] = {:.1}", tree.estimate(&[[20.0, 30.0]], &["x"]).unwrap());
}
