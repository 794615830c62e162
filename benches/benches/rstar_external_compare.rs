// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_octree::{BackendKind, CloseFlags, PointIndex};

use rstar::RTree;

fn gen_lattice(n: usize, cell: f64) -> Vec<[f64; 3]> {
    let mut out = Vec::with_capacity(n * n * n);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                // Offset every other row so queries never land on exact ties.
                let jitter = if (y + z) % 2 == 0 { 0.0 } else { cell * 0.25 };
                out.push([x as f64 * cell + jitter, y as f64 * cell, z as f64 * cell]);
            }
        }
    }
    out
}

fn queries(n: usize, cell: f64) -> Vec<[f64; 3]> {
    (0..256)
        .map(|q| {
            let f = q as f64;
            let side = n as f64 * cell;
            [(f * 7.3) % side, (f * 3.1) % side, (f * 1.7) % side]
        })
        .collect()
}

fn bench_nearest_external_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest_external_compare");
    for &n in &[16usize, 32] {
        let pts = gen_lattice(n, 10.0);
        let qs = queries(n, 10.0);
        group.throughput(Throughput::Elements((n * n * n) as u64));

        group.bench_function(format!("understory_build_query_n{n}"), |b| {
            b.iter_batched(
                || pts.clone(),
                |pts| {
                    let entries: Vec<_> = pts
                        .into_iter()
                        .enumerate()
                        .map(|(i, p)| (p, i as u32))
                        .collect();
                    let idx = PointIndex::builder("lattice")
                        .points(&entries)
                        .flags(understory_octree::SetupFlags::BULK_INSERT)
                        .backend(BackendKind::Morton)
                        .build()
                        .unwrap();
                    let hits = qs.iter().filter_map(|&q| idx.find(q, true)).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            );
        });

        group.bench_function(format!("understory_sorted_query_n{n}"), |b| {
            let entries: Vec<_> = pts.iter().copied().zip(0_u32..).collect();
            let mut idx = PointIndex::builder("lattice")
                .points(&entries)
                .flags(understory_octree::SetupFlags::BULK_INSERT)
                .build()
                .unwrap();
            idx.close(CloseFlags::COMPACT | CloseFlags::SORT);
            b.iter(|| {
                let hits = qs.iter().filter_map(|&q| idx.find(q, true)).count();
                black_box(hits);
            });
        });

        group.bench_function(format!("rstar_build_query_bulk_n{n}"), |b| {
            b.iter_batched(
                || pts.clone(),
                |pts| {
                    let tree = RTree::bulk_load(pts);
                    let hits = qs.iter().filter_map(|q| tree.nearest_neighbor(q)).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_nearest_external_compare);
criterion_main!(benches);
