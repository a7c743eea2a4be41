use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use palette_dither::{
    best_of_restarts, generate_points, Clustering, ClusteringConfig, DistanceMetric, KdTree,
    Point, RestartConfig,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn bench_clustering(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let points = generate_points(20_000, 4, &mut rng);
    let config = ClusteringConfig::default();

    c.bench_function("kmeans_single_run_20k_4d", |b| {
        b.iter_batched(
            || {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                Clustering::new(
                    points.clone(),
                    8,
                    DistanceMetric::Euclidean,
                    config.clone(),
                    &mut rng,
                )
                .expect("valid clustering problem")
            },
            |mut problem| problem.run(),
            BatchSize::LargeInput,
        );
    });

    for parallel in [false, true] {
        let restarts = RestartConfig {
            restarts: 3,
            parallel,
        };
        let name = if parallel {
            "kmeans_restarts_parallel_20k_4d"
        } else {
            "kmeans_restarts_sequential_20k_4d"
        };
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut rng = ChaCha8Rng::seed_from_u64(42);
                best_of_restarts(
                    &points,
                    8,
                    DistanceMetric::RedMean,
                    &config,
                    &restarts,
                    &mut rng,
                )
                .expect("restart bench run")
            });
        });
    }
}

fn bench_kdtree(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let points = generate_points(10_000, 3, &mut rng);
    let queries: Vec<Point> = (0..1_000)
        .map(|id| Point::new((0..3).map(|_| rng.gen::<f64>()).collect(), id))
        .collect();

    c.bench_function("kdtree_build_10k_3d", |b| {
        b.iter_batched(
            || points.clone(),
            |points| KdTree::build(points).expect("non-empty tree"),
            BatchSize::LargeInput,
        );
    });

    let tree = KdTree::build(points.clone()).expect("non-empty tree");
    c.bench_function("kdtree_1k_queries_10k_3d", |b| {
        b.iter(|| {
            queries
                .iter()
                .map(|q| {
                    tree.nearest_neighbor(q, &DistanceMetric::Euclidean)
                        .expect("query matches tree dimension")
                        .1
                })
                .sum::<f64>()
        });
    });
}

criterion_group!(benches, bench_clustering, bench_kdtree);
criterion_main!(benches);
