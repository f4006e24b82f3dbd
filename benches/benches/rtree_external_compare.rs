// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use understory_rtree::{Aabb2D, RTree as UnderstoryTree};

use rstar::primitives::Rectangle;
use rstar::{AABB, RTree};

fn gen_grid_rects(n: usize, cell: f64) -> Vec<Aabb2D<f64>> {
    let mut out = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            let x0 = x as f64 * cell;
            let y0 = y as f64 * cell;
            out.push(Aabb2D::<f64>::from_xywh(x0, y0, cell, cell));
        }
    }
    out
}

fn to_rstar_rects(v: &[Aabb2D<f64>]) -> Vec<Rectangle<[f64; 2]>> {
    v.iter()
        .map(|r| Rectangle::from_corners([r.min_x, r.min_y], [r.max_x, r.max_y]))
        .collect()
}

fn bench_rtree_external_compare_f64(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtree_external_compare_f64");
    for &n in &[64usize, 128] {
        let rects = gen_grid_rects(n, 10.0);
        let aabb_query = Aabb2D::<f64>::from_xywh(100.0, 100.0, 400.0, 400.0);
        group.throughput(Throughput::Elements((n * n) as u64));

        group.bench_function(format!("understory_insert_query_n{n}"), |b| {
            b.iter_batched(
                UnderstoryTree::<f64, u32>::new,
                |mut tree| {
                    for (i, r) in rects.iter().copied().enumerate() {
                        tree.insert(r, i as u32);
                    }
                    black_box(tree.in_extent(&aabb_query).len());
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("understory_load_query_n{n}"), |b| {
            b.iter_batched(
                || {
                    let entries: Vec<_> = rects
                        .iter()
                        .copied()
                        .enumerate()
                        .map(|(i, r)| (r, i as u32))
                        .collect();
                    entries
                },
                |entries| {
                    let mut tree = UnderstoryTree::<f64, u32>::new();
                    tree.load(entries);
                    black_box(tree.in_extent(&aabb_query).len());
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("rstar_bulk_load_query_n{n}"), |b| {
            b.iter_batched(
                || to_rstar_rects(&rects),
                |rectangles| {
                    let tree = RTree::bulk_load(rectangles);
                    let aabb = AABB::from_corners(
                        [aabb_query.min_x, aabb_query.min_y],
                        [aabb_query.max_x, aabb_query.max_y],
                    );
                    let hits: usize = tree.locate_in_envelope_intersecting(&aabb).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_nearest_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest_compare_f64");
    let n = 128;
    let points: Vec<[f64; 2]> = (0..n * n)
        .map(|i| [(i % n) as f64 * 7.3, (i / n) as f64 * 5.1])
        .collect();
    let probe = [401.7, 333.3];

    let mut ours = UnderstoryTree::<f64, u32>::new();
    ours.load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| (Aabb2D::from_point(p[0], p[1]), i as u32)),
    );
    let theirs = RTree::bulk_load(points.clone());

    group.bench_function("understory_branch_and_bound", |b| {
        b.iter(|| {
            let mut best = (f64::INFINITY, None);
            let mut bound = Aabb2D::<f64>::EVERYTHING;
            ours.for_each_in_bound(&mut bound, |bound, id| {
                let p = points[id as usize];
                let (dx, dy) = (p[0] - probe[0], p[1] - probe[1]);
                let d2 = dx * dx + dy * dy;
                if d2 < best.0 {
                    best = (d2, Some(id));
                    let r = d2.sqrt();
                    *bound = Aabb2D::<f64>::around(probe[0], probe[1], r);
                }
                core::ops::ControlFlow::<()>::Continue(())
            });
            black_box(best.1);
        });
    });

    group.bench_function("rstar_nearest_neighbor", |b| {
        b.iter(|| black_box(theirs.nearest_neighbor(&probe).copied()));
    });
    group.finish();
}

criterion_group!(benches, bench_rtree_external_compare_f64, bench_nearest_compare);
criterion_main!(benches);
