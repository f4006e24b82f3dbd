// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Store construction options.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::Extent;
use crate::collection::Collection;
use crate::feature::FeatureRef;
use crate::strategy::{LoadingStrategy, Strategy};

/// Callback that fetches the features of an extent.
///
/// Called with the extent to fetch, the view resolution, and the view
/// projection. It is expected to add the fetched features to the store later,
/// synchronously or not; the store does not wait for it.
pub type Loader = Rc<dyn Fn(&Extent, f64, &Projection)>;

/// Identifier of the coordinate reference system a view is rendered in.
///
/// The store does not transform coordinates; the projection is passed through
/// to the loader.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Projection {
    code: String,
}

impl Projection {
    /// Projection with the given code, e.g. `"EPSG:4326"`.
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// The projection code.
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl Default for Projection {
    /// Spherical Mercator.
    fn default() -> Self {
        Self::new("EPSG:3857")
    }
}

/// Features a store starts out with.
#[derive(Clone, Debug, Default)]
pub enum InitialFeatures {
    /// Start empty.
    #[default]
    None,
    /// Add these features.
    Features(Vec<FeatureRef>),
    /// Add the collection's features and keep the store in sync with it.
    ///
    /// The collection is bound as it is. Items skipped because their id is
    /// already taken stay in it without being tracked by the store.
    Collection(Collection<FeatureRef>),
}

/// Options for [`VectorStore::with_options`](crate::VectorStore::with_options).
pub struct StoreOptions {
    /// Initial features.
    pub features: InitialFeatures,
    /// Index features in an R-tree.
    ///
    /// Without an index the store keeps its features in a bound collection
    /// (created if not supplied) and every spatial query is a linear scan.
    pub use_spatial_index: bool,
    /// How [`load_features`](crate::VectorStore::load_features) splits a request.
    pub strategy: Box<dyn LoadingStrategy>,
    /// Fetches the features of an extent. Without a loader, loads are still
    /// recorded.
    pub loader: Option<Loader>,
    /// Whether features may overlap. Renderers use this as a hint.
    pub overlaps: bool,
    /// Whether the world wraps horizontally. Renderers use this as a hint.
    pub wrap_x: bool,
    /// Maximum fan-out of the feature R-tree nodes.
    pub node_capacity: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            features: InitialFeatures::None,
            use_spatial_index: true,
            strategy: Box::new(Strategy::All),
            loader: None,
            overlaps: true,
            wrap_x: true,
            node_capacity: understory_rtree::DEFAULT_MAX_CHILDREN,
        }
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("features", &self.features)
            .field("use_spatial_index", &self.use_spatial_index)
            .field("loader", &self.loader.is_some())
            .field("overlaps", &self.overlaps)
            .field("wrap_x", &self.wrap_x)
            .field("node_capacity", &self.node_capacity)
            .finish_non_exhaustive()
    }
}
