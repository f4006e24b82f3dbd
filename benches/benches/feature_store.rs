// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kurbo::Point;
use understory_feature_store::{
    Extent, Feature, FeatureRef, Geometry, StoreOptions, VectorStore,
};

fn scattered_points(count: usize) -> Vec<FeatureRef> {
    // Deterministic low-discrepancy spread over a 1000x1000 square.
    (0..count)
        .map(|i| {
            let t = i as f64;
            let x = (t * 0.618_033_988_75).fract() * 1000.0;
            let y = (t * 0.754_877_666_25).fract() * 1000.0;
            Feature::with_id(i, Some(Geometry::Point(Point::new(x, y)))).shared()
        })
        .collect()
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_add");
    for &n in &[1_000usize, 10_000] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_function(format!("add_feature_n{n}"), |b| {
            b.iter_batched(
                || scattered_points(n),
                |features| {
                    let store = VectorStore::new();
                    for f in features {
                        let _ = store.add_feature(f);
                    }
                    black_box(store.len());
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("add_features_n{n}"), |b| {
            b.iter_batched(
                || scattered_points(n),
                |features| {
                    let store = VectorStore::new();
                    let _ = store.add_features(features);
                    black_box(store.len());
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_query");
    let features = scattered_points(10_000);
    let indexed = VectorStore::new();
    let _ = indexed.add_features(features.iter().cloned());
    let unindexed = VectorStore::with_options(StoreOptions {
        use_spatial_index: false,
        ..Default::default()
    })
    .unwrap();
    let _ = unindexed.add_features(features.iter().cloned());
    let view = Extent::new(400.0, 400.0, 450.0, 450.0);
    let probe = Point::new(512.3, 487.9);

    group.bench_function("in_extent_indexed", |b| {
        b.iter(|| black_box(indexed.features_in_extent(&view).len()));
    });
    group.bench_function("in_extent_scan", |b| {
        b.iter(|| black_box(unindexed.features_in_extent(&view).len()));
    });
    group.bench_function("closest_indexed", |b| {
        b.iter(|| black_box(indexed.closest_feature_to_coordinate(probe, None).is_some()));
    });
    group.bench_function("closest_scan", |b| {
        b.iter(|| black_box(unindexed.closest_feature_to_coordinate(probe, None).is_some()));
    });
    group.bench_function("move_feature", |b| {
        let mut step = 0.0;
        b.iter(|| {
            step += 0.5;
            features[42].set_geometry(Some(Geometry::Point(Point::new(step % 1000.0, 10.0))));
        });
    });
    group.finish();
}

criterion_group!(benches, bench_add, bench_queries);
criterion_main!(benches);
