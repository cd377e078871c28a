//! Benchmarks for top-K selection and group accumulation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use sievedb_core::{top_k, CounterTable, ScoredUid, SortOrder};

fn generate_entries(n: usize) -> Vec<ScoredUid> {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|i| ScoredUid::new(i as u32 + 1, rng.gen_range(0..1_000) as f64))
        .collect()
}

fn bench_top_k(c: &mut Criterion) {
    let mut group = c.benchmark_group("top_k");

    for n in [100, 10_000, 1_000_000].iter() {
        let entries = generate_entries(*n);

        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::new("limit_50", n), n, |bench, _| {
            bench.iter(|| top_k(entries.clone(), black_box(50), SortOrder::Descending, |a, b| a < b))
        });
        group.bench_with_input(BenchmarkId::new("full_sort", n), n, |bench, _| {
            bench.iter(|| {
                let mut sorted = entries.clone();
                sorted.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.uid.cmp(&b.uid)));
                sorted.truncate(50);
                sorted
            })
        });
    }

    group.finish();
}

fn bench_counter_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_table");

    for groups in [16, 4_096, 262_144].iter() {
        let keys: Vec<u32> = {
            let mut rng = rand::thread_rng();
            (0..1_000_000).map(|_| rng.gen_range(1..=*groups)).collect()
        };

        group.throughput(Throughput::Elements(keys.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(groups), groups, |bench, &groups| {
            bench.iter(|| {
                let mut table = CounterTable::with_expected(groups as usize);
                for &k in &keys {
                    table.insert(k).score += 1.0;
                }
                table.len()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_top_k, bench_counter_table);
criterion_main!(benches);
