// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_octree::{BackendKind, CloseFlags, PointIndex};

const BACKENDS: [BackendKind; 6] = [
    BackendKind::Geometric,
    BackendKind::Morton,
    BackendKind::MortonAligned,
    BackendKind::ZOrderHashed,
    BackendKind::ZOrderHashedAligned,
    BackendKind::Sorted,
];

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    fn next_f64(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) / ((1u64 << 53) as f64)
    }
}

fn gen_uniform(count: usize, side: f64, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = Rng::new(seed);
    (0..count)
        .map(|_| {
            [
                rng.next_f64() * side,
                rng.next_f64() * side,
                rng.next_f64() * side,
            ]
        })
        .collect()
}

fn gen_clustered(n_clusters: usize, per_cluster: usize, spread: f64) -> Vec<[f64; 3]> {
    let mut rng = Rng::new(0xC1A5_7E55_9999_ABCD);
    let mut out = Vec::with_capacity(n_clusters * per_cluster);
    for _ in 0..n_clusters {
        let c = [
            rng.next_f64() * 1000.0,
            rng.next_f64() * 1000.0,
            rng.next_f64() * 1000.0,
        ];
        for _ in 0..per_cluster {
            out.push([
                c[0] + (rng.next_f64() - 0.5) * spread,
                c[1] + (rng.next_f64() - 0.5) * spread,
                c[2] + (rng.next_f64() - 0.5) * spread,
            ]);
        }
    }
    out
}

fn build(kind: BackendKind, pts: &[[f64; 3]], side: f64) -> PointIndex<u32> {
    let mut idx = PointIndex::builder("bench")
        .extents([-side, -side, -side], [2.0 * side; 3])
        .expected_points(pts.len())
        .max_distance(side / 16.0)
        .backend(kind)
        .build()
        .unwrap();
    for (i, &p) in pts.iter().enumerate() {
        let _ = idx.insert(p, i as u32, 0);
    }
    idx
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_uniform");
    for &n in &[1_000usize, 10_000] {
        let pts = gen_uniform(n, 1000.0, 0xCAFE_F00D_DEAD_BEEF);
        group.throughput(Throughput::Elements(n as u64));
        for kind in BACKENDS {
            group.bench_function(format!("{kind}_n{n}"), |b| {
                b.iter(|| black_box(build(kind, &pts, 1000.0).len()));
            });
        }
    }
    group.finish();
}

fn bench_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest_uniform");
    let pts = gen_uniform(10_000, 1000.0, 0xCAFE_F00D_DEAD_BEEF);
    let queries = gen_uniform(256, 1000.0, 0xFACE_FEED_CAFE_BABE);
    group.throughput(Throughput::Elements(queries.len() as u64));
    for kind in BACKENDS {
        let idx = build(kind, &pts, 1000.0);
        group.bench_function(format!("{kind}_building"), |b| {
            b.iter(|| {
                let hits = queries.iter().filter_map(|&q| idx.find(q, true)).count();
                black_box(hits);
            });
        });
    }
    let mut idx = build(BackendKind::Geometric, &pts, 1000.0);
    idx.close(CloseFlags::COMPACT | CloseFlags::SORT);
    group.bench_function("packed_sorted", |b| {
        b.iter(|| {
            let hits = queries.iter().filter_map(|&q| idx.find(q, true)).count();
            black_box(hits);
        });
    });
    group.finish();
}

fn bench_search_clustered(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_clustered");
    let pts = gen_clustered(16, 512, 40.0);
    let queries = gen_uniform(256, 1000.0, 0xBADC_F00D_1234_5678);
    for kind in BACKENDS {
        group.bench_function(format!("{kind}_build_then_search"), |b| {
            b.iter_batched(
                || build(kind, &pts, 1000.0),
                |idx| {
                    let hits = queries
                        .iter()
                        .filter_map(|&q| idx.search(q, 25.0))
                        .count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_close(c: &mut Criterion) {
    let mut group = c.benchmark_group("close");
    let pts = gen_uniform(10_000, 1000.0, 0xCAFE_F00D_DEAD_BEEF);
    for (label, flags) in [
        ("compact", CloseFlags::COMPACT),
        ("compact_sort", CloseFlags::COMPACT | CloseFlags::SORT),
        (
            "compact_sort_dedup",
            CloseFlags::COMPACT | CloseFlags::SORT | CloseFlags::NO_DUPLICATES,
        ),
    ] {
        group.bench_function(label, |b| {
            b.iter_batched(
                || build(BackendKind::Morton, &pts, 1000.0),
                |mut idx| {
                    idx.close(flags);
                    black_box(idx.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_nearest,
    bench_search_clustered,
    bench_close,
);
criterion_main!(benches);
