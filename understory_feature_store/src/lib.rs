// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_feature_store --heading-base-level=0

//! Understory Feature Store: a spatially indexed store of mutable vector features.
//!
//! A [`VectorStore`] keeps [`Feature`]s (an optional [`Geometry`], an optional
//! caller-supplied [`FeatureId`], and properties) and answers:
//!
//! - id lookup, with duplicate ids deduplicated on insert,
//! - bounding-box, exact-geometry, and point queries via an R-tree,
//! - nearest-feature search by branch-and-bound over the same tree,
//! - which extents have already been requested from a [`Loader`].
//!
//! Features notify the store when they change; the store moves their index
//! entries and emits a [`StoreEvent`]. A store can be bound to a
//! [`Collection`] and keeps it in sync in both directions.
//!
//! Loading is driven by a [`LoadingStrategy`]: [`Strategy::All`] fetches
//! everything once, [`Strategy::Bbox`] fetches each view, and
//! [`Strategy::Tile`] fetches the tiles of a [`TileGrid`].
//!
//! # Example
//!
//! ```rust
//! use core::ops::ControlFlow;
//! use kurbo::Point;
//! use understory_feature_store::{
//!     Extent, Feature, FeatureId, Geometry, StoreEventKinds, VectorStore,
//! };
//!
//! let store = VectorStore::new();
//! store.subscribe(StoreEventKinds::ADD, |event| {
//!     assert!(event.feature().is_some());
//! });
//!
//! let home = Feature::with_id("home", Some(Geometry::Point(Point::new(2.0, 3.0)))).shared();
//! let work = Feature::with_id("work", Some(Geometry::Point(Point::new(40.0, 10.0)))).shared();
//! assert_eq!(store.add_features([home.clone(), work.clone()]), Ok(2));
//!
//! // Ids are unique: a second "home" is skipped.
//! let again = Feature::with_id("home", None).shared();
//! assert_eq!(store.add_feature(again), Ok(false));
//!
//! let near_origin = store.features_in_extent(&Extent::new(0.0, 0.0, 10.0, 10.0));
//! assert_eq!(near_origin.len(), 1);
//!
//! let closest = store.closest_feature_to_coordinate(Point::new(35.0, 10.0), None);
//! assert_eq!(closest.and_then(|f| f.id()), Some(FeatureId::from("work")));
//!
//! // Moving a feature moves its index entry.
//! home.set_geometry(Some(Geometry::Point(Point::new(41.0, 11.0))));
//! let found = store.for_each_feature_in_extent(&Extent::new(39.0, 9.0, 42.0, 12.0), |f| {
//!     if f.handle() == home.handle() { ControlFlow::Break(()) } else { ControlFlow::Continue(()) }
//! });
//! assert!(found.is_some());
//! assert_eq!(store.feature_by_id("home").map(|f| f.handle()), Some(home.handle()));
//! ```
//!
//! ### Float semantics
//!
//! Coordinates are `f64` and assumed free of NaNs. The store is single-threaded:
//! handles are reference counted and not `Send`.

#![no_std]

extern crate alloc;

pub mod collection;
pub mod error;
pub mod event;
pub mod feature;
pub mod geometry;
pub mod identity;
pub mod loaded;
pub mod options;
pub mod store;
pub mod strategy;

/// Axis-aligned bounding box in map units.
pub type Extent = understory_rtree::Aabb2D<f64>;

pub use collection::{Collection, CollectionEvent};
pub use error::{Result, StoreError};
pub use event::{ListenerKey, StoreEvent, StoreEventKinds};
pub use feature::{ChangeKind, Feature, FeatureHandle, FeatureId, FeatureRef, PropertyValue};
pub use geometry::{ClosestPoint, Geometry};
pub use identity::{Identity, IdentityIndex};
pub use loaded::LoadedExtents;
pub use options::{InitialFeatures, Loader, Projection, StoreOptions};
pub use store::VectorStore;
pub use strategy::{LoadingStrategy, Strategy, TileCoord, TileGrid, TileRange};

pub use kurbo;
