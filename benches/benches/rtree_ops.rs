// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_rtree::{Aabb2D, RTree};

fn grid(n: usize, cell: f64) -> Vec<(Aabb2D<f64>, u32)> {
    let mut out = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            let id = (y * n + x) as u32;
            out.push((Aabb2D::<f64>::from_xywh(x as f64 * cell, y as f64 * cell, cell, cell), id));
        }
    }
    out
}

#[derive(Clone)]
struct Rng(u64);

impl Rng {
    fn next_f64(&mut self) -> f64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        ((x >> 11) as f64) / ((1u64 << 53) as f64)
    }
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtree_build");
    for &n in &[32usize, 128] {
        let entries = grid(n, 10.0);
        group.throughput(Throughput::Elements((n * n) as u64));

        group.bench_function(format!("insert_n{n}"), |b| {
            b.iter_batched(
                || entries.clone(),
                |entries| {
                    let mut tree: RTree<f64, u32> = RTree::new();
                    for (bbox, id) in entries {
                        tree.insert(bbox, id);
                    }
                    black_box(tree.height());
                },
                BatchSize::SmallInput,
            );
        });

        group.bench_function(format!("load_n{n}"), |b| {
            b.iter_batched(
                || entries.clone(),
                |entries| {
                    let mut tree: RTree<f64, u32> = RTree::new();
                    tree.load(entries);
                    black_box(tree.height());
                },
                BatchSize::SmallInput,
            );
        });

        group.bench_function(format!("load_into_half_full_n{n}"), |b| {
            let (first, second) = entries.split_at(entries.len() / 2);
            b.iter_batched(
                || {
                    let mut tree: RTree<f64, u32> = RTree::new();
                    tree.load(first.iter().copied());
                    (tree, second.to_vec())
                },
                |(mut tree, rest)| {
                    tree.load(rest);
                    black_box(tree.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_query_and_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtree_query_update");
    let n = 128;
    let mut tree: RTree<f64, u32> = RTree::new();
    tree.load(grid(n, 10.0));
    let q = Aabb2D::<f64>::from_xywh(300.0, 300.0, 200.0, 200.0);

    group.bench_function("in_extent", |b| {
        b.iter(|| black_box(tree.in_extent(&q).len()));
    });

    group.bench_function("update_small_moves", |b| {
        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
        b.iter_batched(
            || tree.clone(),
            |mut t| {
                for id in 0..1000_u32 {
                    let x = f64::from(id % 128) * 10.0 + rng.next_f64();
                    let y = f64::from(id / 128) * 10.0 + rng.next_f64();
                    let _ = t.update(Aabb2D::<f64>::from_xywh(x, y, 9.0, 9.0), id);
                }
                black_box(t.len());
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("remove_half", |b| {
        b.iter_batched(
            || tree.clone(),
            |mut t| {
                for id in (0..(n * n) as u32).step_by(2) {
                    let _ = t.remove(&id);
                }
                black_box(t.len());
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_query_and_update);
criterion_main!(benches);
