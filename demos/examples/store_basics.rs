// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Feature store basics.
//!
//! Add features, query by extent and coordinate, find the nearest feature,
//! and watch the index follow feature edits.
//!
//! Run:
//! - `RUST_LOG=understory_feature_store=trace cargo run -p understory_demos --example store_basics`

use kurbo::{Circle, Point, Vec2};
use tracing_subscriber::EnvFilter;
use understory_feature_store::{
    Extent, Feature, Geometry, StoreEvent, StoreEventKinds, VectorStore,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = VectorStore::new();
    store.subscribe(StoreEventKinds::all(), |event| match event {
        StoreEvent::Changed { revision } => println!("  changed -> revision {revision}"),
        other => println!("  {:?} {:?}", other.kind(), other.feature().and_then(|f| f.id())),
    });

    let lake = Feature::with_id(
        "lake",
        Some(Geometry::Polygon(vec![vec![
            Point::new(0.0, 0.0),
            Point::new(40.0, 0.0),
            Point::new(40.0, 30.0),
            Point::new(0.0, 30.0),
        ]])),
    )
    .shared();
    let road = Feature::with_id(
        "road",
        Some(Geometry::LineString(vec![
            Point::new(-10.0, 50.0),
            Point::new(100.0, 50.0),
        ])),
    )
    .shared();
    let tower = Feature::with_id("tower", Some(Geometry::Circle(Circle::new((80.0, 10.0), 5.0))))
        .shared();
    let unplaced = Feature::with_id("unplaced", None).shared();

    println!("add_features:");
    let added = store
        .add_features([lake.clone(), road.clone(), tower.clone(), unplaced])
        .unwrap();
    assert_eq!(added, 4);
    println!("extent: {:?}", store.extent());

    let at = store.features_at_coordinate(Point::new(10.0, 10.0));
    println!("at (10, 10): {:?}", at.iter().map(|f| f.id()).collect::<Vec<_>>());

    let view = Extent::new(30.0, 20.0, 90.0, 60.0);
    let in_view = store.features_in_extent(&view);
    println!("bbox in view: {}", in_view.len());

    let nearest = store.closest_feature_to_coordinate(Point::new(70.0, 40.0), None);
    println!("nearest to (70, 40): {:?}", nearest.and_then(|f| f.id()));
    let not_road = |f: &Feature| f.id().is_none_or(|id| id.as_str() != "road");
    let nearest = store.closest_feature_to_coordinate(Point::new(70.0, 40.0), Some(&not_road));
    println!("nearest that is not the road: {:?}", nearest.and_then(|f| f.id()));

    println!("move the tower:");
    tower.update_geometry(|g| g.translate(Vec2::new(-200.0, 0.0)));
    assert!(store.features_in_extent(&Extent::new(70.0, 0.0, 90.0, 20.0)).is_empty());

    println!("remove the lake:");
    store.remove_feature(&lake).unwrap();
    println!("{store:?}");
}
