// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Keeping a store and a collection in sync.
//!
//! A store without spatial index owns a collection; edits on either side show
//! up on the other without looping.
//!
//! Run:
//! - `cargo run -p understory_demos --example collection_sync`

use kurbo::Point;
use tracing_subscriber::EnvFilter;
use understory_feature_store::{
    Collection, CollectionEvent, Feature, FeatureRef, Geometry, InitialFeatures, StoreEventKinds,
    StoreOptions, VectorStore,
};

fn point(id: &str, x: f64, y: f64) -> FeatureRef {
    Feature::with_id(id, Some(Geometry::Point(Point::new(x, y)))).shared()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let collection: Collection<FeatureRef> = Collection::from_vec(vec![point("a", 0.0, 0.0)]);
    collection.listen(|event| match event {
        CollectionEvent::Add(f) => println!("collection: add {:?}", f.id()),
        CollectionEvent::Remove(f) => println!("collection: remove {:?}", f.id()),
    });

    let store = VectorStore::with_options(StoreOptions {
        features: InitialFeatures::Collection(collection.clone()),
        use_spatial_index: false,
        ..Default::default()
    })
    .unwrap();
    store.subscribe(StoreEventKinds::ADD | StoreEventKinds::REMOVE, |event| {
        println!("store: {:?} {:?}", event.kind(), event.feature().and_then(|f| f.id()));
    });

    println!("-- push onto the collection");
    collection.push(point("b", 5.0, 5.0));
    println!("-- add to the store");
    store.add_feature(point("c", 9.0, 1.0)).unwrap();
    println!("-- duplicate id pushed onto the collection is skipped by the store");
    collection.push(point("c", 50.0, 50.0));

    println!("-- remove from the store");
    if let Some(b) = store.feature_by_id("b") {
        store.remove_feature(&b).unwrap();
    }
    println!(
        "collection has {} items, store has {} features",
        collection.len(),
        store.len()
    );

    println!("-- clear");
    store.clear(true);
    println!("collection empty: {}, store empty: {}", collection.is_empty(), store.is_empty());
}
