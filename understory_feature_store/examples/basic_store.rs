// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Basic usage of Understory Feature Store: add, query, move, and remove.

use kurbo::Point;
use understory_feature_store::{Extent, Feature, Geometry, StoreEventKinds, VectorStore};

fn main() {
    let store = VectorStore::new();
    store.subscribe(StoreEventKinds::ADD | StoreEventKinds::REMOVE, |event| {
        println!("{:?} {:?}", event.kind(), event.feature().map(|f| f.handle()));
    });

    let features: Vec<_> = (0..16)
        .map(|i| {
            let p = Point::new(f64::from(i % 4) * 10.0, f64::from(i / 4) * 10.0);
            Feature::with_id(i, Some(Geometry::Point(p))).shared()
        })
        .collect();
    let added = store.add_features(features).unwrap();
    println!("added {added} features, extent {:?}", store.extent());

    let hits = store.features_in_extent(&Extent::new(0.0, 0.0, 15.0, 15.0));
    println!("{} features in [0,0,15,15]", hits.len());

    let nearest = store.closest_feature_to_coordinate(Point::new(26.0, 19.0), None);
    println!("nearest to (26, 19): {:?}", nearest.and_then(|f| f.id()));

    if let Some(f) = store.feature_by_id(5) {
        f.set_geometry(Some(Geometry::Point(Point::new(100.0, 100.0))));
        println!("moved feature 5, extent now {:?}", store.extent());
        store.remove_feature(&f).unwrap();
    }
    println!("{} features left, revision {}", store.len(), store.revision());
}
