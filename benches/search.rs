use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ndarray::Array2;
use rand::prelude::*;
use visearch::FlatL2Index;

fn random_vectors(rng: &mut StdRng, n: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()).collect()
}

fn bench_flat_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("FlatL2");
    let mut rng = StdRng::seed_from_u64(0);
    let dim = 192;

    for n in [1_000, 10_000, 100_000] {
        let mut index = FlatL2Index::new();
        index.add(&random_vectors(&mut rng, n, dim)).unwrap();
        let query = random_vectors(&mut rng, 1, dim).remove(0);

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("search_k10", n), &n, |b, _| {
            b.iter(|| index.search(black_box(&query), 10).unwrap());
        });
    }

    let mut index = FlatL2Index::new();
    index.add(&random_vectors(&mut rng, 10_000, dim)).unwrap();
    let queries = random_vectors(&mut rng, 32, dim).concat();
    let queries = Array2::from_shape_vec((32, dim), queries).unwrap();
    group.bench_function("batch_search_32", |b| {
        b.iter(|| index.batch_search(black_box(queries.view()), 10).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_flat_search);
criterion_main!(benches);
