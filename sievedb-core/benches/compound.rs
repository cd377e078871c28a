//! Benchmarks for bitset construction and compound evaluation.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use sievedb_core::{BitsetArena, HierarchicalBitset, QuerySet, UID_LIMIT};

fn random_bitset(arena: &Arc<BitsetArena>, members: usize, universe: u32) -> HierarchicalBitset {
    let mut rng = rand::thread_rng();
    let set = HierarchicalBitset::new(arena.clone());
    for _ in 0..members {
        set.set(rng.gen_range(0..universe)).unwrap();
    }
    set
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitset_set");

    for members in [32, 1_000, 100_000].iter() {
        let uids: Vec<u32> = {
            let mut rng = rand::thread_rng();
            (0..*members).map(|_| rng.gen_range(0..UID_LIMIT)).collect()
        };

        group.throughput(Throughput::Elements(*members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), members, |bench, _| {
            bench.iter(|| {
                let arena = Arc::new(BitsetArena::with_capacity(16));
                let set = HierarchicalBitset::new(arena);
                for &uid in &uids {
                    set.set(black_box(uid)).unwrap();
                }
                set
            })
        });
    }

    group.finish();
}

fn bench_and(c: &mut Criterion) {
    let mut group = c.benchmark_group("compound_and");
    let arena = Arc::new(BitsetArena::with_capacity(64));
    let universe = 1_000_000;

    for members in [1_000, 50_000, 500_000].iter() {
        let a = random_bitset(&arena, *members, universe);
        let b = random_bitset(&arena, *members, universe);
        let small = random_bitset(&arena, 40, universe);

        group.bench_with_input(BenchmarkId::new("dense", members), members, |bench, _| {
            bench.iter(|| {
                QuerySet::and(vec![
                    QuerySet::leaf(a.snapshot()),
                    QuerySet::leaf(b.snapshot()),
                ])
                .count()
            })
        });
        group.bench_with_input(BenchmarkId::new("raw_filter", members), members, |bench, _| {
            bench.iter(|| {
                QuerySet::and(vec![
                    QuerySet::leaf(a.snapshot()),
                    QuerySet::leaf(small.snapshot()),
                ])
                .count()
            })
        });
    }

    group.finish();
}

fn bench_or_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("compound_or_collect");
    let arena = Arc::new(BitsetArena::with_capacity(64));
    let sets: Vec<_> = (0..8)
        .map(|_| random_bitset(&arena, 20_000, 1_000_000))
        .collect();

    for limit in [10, 1_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(limit), limit, |bench, &limit| {
            bench.iter(|| {
                let members = sets.iter().map(|s| QuerySet::leaf(s.snapshot())).collect();
                QuerySet::or(members).collect(u32::MAX, black_box(limit))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_and, bench_or_collect);
criterion_main!(benches);
