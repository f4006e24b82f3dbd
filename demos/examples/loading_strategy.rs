// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loading strategies.
//!
//! Pan a view over a tiled grid: each tile is fetched once, and the loader
//! feeds features back into the store synchronously.
//!
//! Run:
//! - `RUST_LOG=debug cargo run -p understory_demos --example loading_strategy`

use std::cell::Cell;
use std::rc::Rc;

use kurbo::Point;
use tracing::info;
use tracing_subscriber::EnvFilter;
use understory_feature_store::{
    Extent, Feature, Geometry, Projection, StoreOptions, Strategy, TileGrid, VectorStore,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let grid = TileGrid::for_extent(Extent::new(0.0, 0.0, 4096.0, 4096.0), 4, 256.0);
    let store = VectorStore::with_options(StoreOptions {
        strategy: Box::new(Strategy::Tile(grid)),
        ..Default::default()
    })
    .unwrap();

    let fetches = Rc::new(Cell::new(0_u32));
    let sink = store.clone();
    let counter = fetches.clone();
    store.set_loader(move |tile, resolution, projection| {
        counter.set(counter.get() + 1);
        info!(?tile, resolution, projection = projection.code(), "fetching tile");
        // One feature per tile, keyed by the tile corner so refetches dedupe.
        let id = format!("{}:{}", tile.min_x, tile.min_y);
        let center = Point::new((tile.min_x + tile.max_x) / 2.0, (tile.min_y + tile.max_y) / 2.0);
        let _ = sink.add_feature(Feature::with_id(id, Some(Geometry::Point(center))).shared());
    });

    let proj = Projection::default();
    let resolution = 2.0;
    let mut view = Extent::new(0.0, 0.0, 800.0, 600.0);
    for step in 0..5 {
        let issued = store.load_features(&view, resolution, &proj);
        println!(
            "step {step}: view {view:?} issued {issued} tiles, store holds {} features",
            store.len()
        );
        view = Extent::new(view.min_x + 300.0, view.min_y, view.max_x + 300.0, view.max_y);
    }

    // Forget one tile and reload it.
    if let Some(first) = store.loaded_extents().first().copied() {
        store.remove_loaded_extent(&first);
        let again = store.load_features(&first, resolution, &proj);
        println!("reloaded {again} tile(s) after forgetting {first:?}");
    }
    println!("loader ran {} times", fetches.get());

    let bbox_store = VectorStore::with_options(StoreOptions {
        strategy: Box::new(Strategy::Bbox),
        ..Default::default()
    })
    .unwrap();
    let outer = Extent::new(0.0, 0.0, 1000.0, 1000.0);
    let inner = Extent::new(100.0, 100.0, 200.0, 200.0);
    println!(
        "bbox strategy: outer issues {}, inner then issues {}",
        bbox_store.load_features(&outer, 1.0, &proj),
        bbox_store.load_features(&inner, 1.0, &proj)
    );
}
