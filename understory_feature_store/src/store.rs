// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The feature store: identity index, spatial index, and loaded extents
//! behind one mutation and query API.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, OnceCell, RefCell};
use core::ops::ControlFlow;

use kurbo::Point;
use tracing::{debug, trace, warn};
use understory_rtree::RTree;

use crate::Extent;
use crate::collection::{Collection, CollectionEvent};
use crate::error::{Result, StoreError};
use crate::event::{ListenerKey, Listeners, StoreEvent, StoreEventKinds};
use crate::feature::{ChangeKind, Feature, FeatureHandle, FeatureId, FeatureRef};
use crate::identity::IdentityIndex;
use crate::loaded::LoadedExtents;
use crate::options::{InitialFeatures, Loader, Projection, StoreOptions};
use crate::strategy::LoadingStrategy;

type Observer = Rc<dyn Fn(&StoreEvent)>;

struct Tracked {
    feature: FeatureRef,
    /// Geometry and property subscriptions; `None` once released.
    subscriptions: Option<[ListenerKey; 2]>,
}

impl Tracked {
    fn release(&mut self) {
        if let Some(keys) = self.subscriptions.take() {
            for key in keys {
                self.feature.unlisten(key);
            }
        }
    }
}

struct StoreState {
    features_rtree: Option<RTree<f64, FeatureHandle>>,
    null_geometry: BTreeMap<FeatureHandle, FeatureRef>,
    identity: IdentityIndex,
    tracked: BTreeMap<FeatureHandle, Tracked>,
}

impl StoreState {
    fn resolve(&self, handles: Vec<FeatureHandle>) -> Vec<FeatureRef> {
        handles
            .into_iter()
            .filter_map(|h| self.tracked.get(&h).map(|t| t.feature.clone()))
            .collect()
    }
}

struct Loading {
    loader: Option<Loader>,
    strategy: Box<dyn LoadingStrategy>,
    loaded: LoadedExtents,
}

struct Binding {
    collection: Collection<FeatureRef>,
    listener: ListenerKey,
}

struct Shared {
    state: RefCell<StoreState>,
    loading: RefCell<Loading>,
    observers: Listeners<(StoreEventKinds, Observer)>,
    binding: OnceCell<Binding>,
    modifying_collection: Cell<bool>,
    revision: Cell<u64>,
    overlaps: bool,
    wrap_x: bool,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.get() {
            binding.collection.unlisten(binding.listener);
        }
        for tracked in self.state.get_mut().tracked.values_mut() {
            tracked.release();
        }
    }
}

/// Spatially indexed store of mutable features.
///
/// `VectorStore` is a cheap shared handle: clones operate on the same store.
/// All operations run synchronously to completion. Events are delivered after
/// the store's internal state has been updated and no internal borrow is held,
/// so observers may query and mutate the store, with one exception: the filter
/// passed to [`VectorStore::closest_feature_to_coordinate`] runs during the
/// index traversal and must not mutate the store or its features.
///
/// Mutating the store from an observer while a batch of `Add` events is still
/// being delivered is allowed but unguarded: later events of the batch may
/// describe features that are already gone.
#[derive(Clone)]
pub struct VectorStore {
    shared: Rc<Shared>,
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorStore {
    /// Create an empty store with default options.
    pub fn new() -> Self {
        Self::empty(StoreOptions::default())
    }

    /// Create a store from `options`.
    ///
    /// Fails with [`StoreError::AlreadyAdded`] when the initial features list
    /// the same feature without id twice.
    ///
    /// A store without spatial index and without a supplied collection gets a
    /// collection of the accepted initial features. A supplied collection is
    /// bound as it is: items skipped for a taken id stay in it, untracked.
    pub fn with_options(mut options: StoreOptions) -> Result<Self> {
        let initial = core::mem::take(&mut options.features);
        let use_spatial_index = options.use_spatial_index;
        let store = Self::empty(options);

        let (collection, features) = match initial {
            InitialFeatures::None => (None, Vec::new()),
            InitialFeatures::Features(features) => (None, features),
            InitialFeatures::Collection(collection) => {
                let features = collection.to_vec();
                (Some(collection), features)
            }
        };
        let accepted = if features.is_empty() {
            Vec::new()
        } else {
            let offered = features.len();
            let accepted = store.insert_batch(features)?;
            debug!(offered, accepted = accepted.len(), "seeded store");
            accepted
        };
        let collection = match collection {
            None if !use_spatial_index => Some(Collection::from_vec(accepted)),
            other => other,
        };
        if let Some(collection) = collection {
            store.bind_collection(collection);
        }
        Ok(store)
    }

    fn empty(options: StoreOptions) -> Self {
        let features_rtree = options
            .use_spatial_index
            .then(|| RTree::with_max_children(options.node_capacity));
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(StoreState {
                    features_rtree,
                    null_geometry: BTreeMap::new(),
                    identity: IdentityIndex::new(),
                    tracked: BTreeMap::new(),
                }),
                loading: RefCell::new(Loading {
                    loader: options.loader,
                    strategy: options.strategy,
                    loaded: LoadedExtents::new(),
                }),
                observers: Listeners::new(),
                binding: OnceCell::new(),
                modifying_collection: Cell::new(false),
                revision: Cell::new(0),
                overlaps: options.overlaps,
                wrap_x: options.wrap_x,
            }),
        }
    }

    // --- mutation ---

    /// Add a feature.
    ///
    /// Returns `Ok(false)`, without any event, when another feature already
    /// holds the feature's id. Emits [`StoreEvent::Add`] then
    /// [`StoreEvent::Changed`] otherwise.
    pub fn add_feature(&self, feature: FeatureRef) -> Result<bool> {
        if !self.insert_one(&feature)? {
            return Ok(false);
        }
        self.dispatch(StoreEvent::Add(feature));
        self.changed();
        Ok(true)
    }

    /// Add a batch of features, bulk-loading the spatial index.
    ///
    /// Features whose id is taken are skipped. The `Add` events are emitted
    /// after the whole batch is indexed, followed by one `Changed`, which is
    /// sent even when nothing was accepted. Returns the number of accepted
    /// features. On error nothing of the batch is kept.
    pub fn add_features(&self, features: impl IntoIterator<Item = FeatureRef>) -> Result<usize> {
        let features: Vec<FeatureRef> = features.into_iter().collect();
        let offered = features.len();
        let accepted = self.insert_batch(features)?;
        let count = accepted.len();
        debug!(offered, accepted = count, "added feature batch");
        for feature in accepted {
            self.dispatch(StoreEvent::Add(feature));
        }
        self.changed();
        Ok(count)
    }

    /// Remove a feature, emitting [`StoreEvent::Remove`] then
    /// [`StoreEvent::Changed`].
    pub fn remove_feature(&self, feature: &Feature) -> Result<()> {
        let feature = self.detach(feature.handle(), true)?;
        self.dispatch(StoreEvent::Remove(feature));
        self.changed();
        Ok(())
    }

    /// Remove every feature and forget all loaded extents.
    ///
    /// With `fast`, features are dropped without a `Remove` event each, unless
    /// a collection is bound: the collection is cleared item by item and the
    /// store follows it. Without `fast`, each indexed feature gets its
    /// `Remove`. Either way one [`StoreEvent::Clear`] and one
    /// [`StoreEvent::Changed`] close the operation and every feature
    /// subscription is released.
    pub fn clear(&self, fast: bool) {
        let collection = self.features_collection();
        if fast {
            let mut state = self.shared.state.borrow_mut();
            for tracked in state.tracked.values_mut() {
                tracked.release();
            }
            if collection.is_none() {
                state.tracked.clear();
                state.identity.clear();
            }
        } else {
            let doomed = {
                let state = self.shared.state.borrow();
                match &state.features_rtree {
                    Some(rtree) => {
                        let mut features = state.resolve(rtree.all());
                        features.extend(state.null_geometry.values().cloned());
                        features
                    }
                    None => Vec::new(),
                }
            };
            for feature in doomed {
                if let Ok(feature) = self.detach(feature.handle(), false) {
                    self.dispatch(StoreEvent::Remove(feature));
                }
            }
        }

        if let Some(collection) = collection {
            collection.clear();
        }

        {
            let mut guard = self.shared.state.borrow_mut();
            let state = &mut *guard;
            for tracked in state.tracked.values_mut() {
                tracked.release();
            }
            state.tracked.clear();
            state.identity.clear();
            state.null_geometry.clear();
            if let Some(rtree) = state.features_rtree.as_mut() {
                rtree.clear();
            }
        }
        self.shared.loading.borrow_mut().loaded.clear();
        debug!(fast, "cleared store");
        self.dispatch(StoreEvent::Clear);
        self.changed();
    }

    // --- queries ---

    /// Visit every feature with early exit.
    ///
    /// With a spatial index this covers the indexed features only; features
    /// with a null geometry are skipped.
    pub fn for_each_feature<B>(&self, f: impl FnMut(&FeatureRef) -> ControlFlow<B>) -> Option<B> {
        let indexed = {
            let state = self.shared.state.borrow();
            state
                .features_rtree
                .as_ref()
                .map(|rtree| state.resolve(rtree.all()))
        };
        visit(indexed.unwrap_or_else(|| self.scan()), f)
    }

    /// Visit the features whose geometry covers `point`.
    pub fn for_each_feature_at_coordinate<B>(
        &self,
        point: Point,
        mut f: impl FnMut(&FeatureRef) -> ControlFlow<B>,
    ) -> Option<B> {
        let extent = Extent::from_point(point.x, point.y);
        visit(self.candidates(&extent), |feature| {
            if feature.with_geometry(|g| g.is_some_and(|g| g.intersects_coordinate(point))) {
                f(feature)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// Visit the features whose bounding box intersects `extent`.
    ///
    /// The geometry itself may miss the extent; see
    /// [`VectorStore::for_each_feature_intersecting_extent`] for the exact test.
    pub fn for_each_feature_in_extent<B>(
        &self,
        extent: &Extent,
        f: impl FnMut(&FeatureRef) -> ControlFlow<B>,
    ) -> Option<B> {
        visit(self.candidates(extent), f)
    }

    /// Visit the features whose geometry intersects `extent`.
    pub fn for_each_feature_intersecting_extent<B>(
        &self,
        extent: &Extent,
        mut f: impl FnMut(&FeatureRef) -> ControlFlow<B>,
    ) -> Option<B> {
        visit(self.candidates(extent), |feature| {
            if feature.with_geometry(|g| g.is_some_and(|g| g.intersects_extent(extent))) {
                f(feature)
            } else {
                ControlFlow::Continue(())
            }
        })
    }

    /// All features, in unspecified order.
    ///
    /// When a collection is bound, this is the collection's content.
    pub fn features(&self) -> Vec<FeatureRef> {
        if let Some(binding) = self.shared.binding.get() {
            return binding.collection.to_vec();
        }
        let state = self.shared.state.borrow();
        let mut features = state
            .features_rtree
            .as_ref()
            .map(|rtree| state.resolve(rtree.all()))
            .unwrap_or_default();
        features.extend(state.null_geometry.values().cloned());
        features
    }

    /// Features whose geometry covers `point`.
    pub fn features_at_coordinate(&self, point: Point) -> Vec<FeatureRef> {
        let mut out = Vec::new();
        self.for_each_feature_at_coordinate(point, |f| {
            out.push(f.clone());
            ControlFlow::<()>::Continue(())
        });
        out
    }

    /// Features whose bounding box intersects `extent`, in unspecified order.
    pub fn features_in_extent(&self, extent: &Extent) -> Vec<FeatureRef> {
        self.candidates(extent)
    }

    /// The feature nearest to `point`, optionally restricted by `filter`.
    ///
    /// Distances are measured to the nearest point of each geometry (the
    /// boundary, for polygons and circles). Returns `None` when no feature
    /// passes the filter.
    ///
    /// # Panics
    ///
    /// With a spatial index, `filter` runs while the index is borrowed; a
    /// filter that mutates the store or one of its features panics.
    pub fn closest_feature_to_coordinate(
        &self,
        point: Point,
        filter: Option<&dyn Fn(&Feature) -> bool>,
    ) -> Option<FeatureRef> {
        let mut search = NearestSearch {
            point,
            filter,
            best: None,
            distance_squared: f64::INFINITY,
            radius: f64::INFINITY,
        };
        {
            let state = self.shared.state.borrow();
            if let Some(rtree) = &state.features_rtree {
                let mut bound = Extent::EVERYTHING;
                rtree.for_each_in_bound(&mut bound, |bound, handle| {
                    if let Some(tracked) = state.tracked.get(&handle)
                        && let Some(shrunk) = search.offer(&tracked.feature)
                    {
                        // Any closer feature must intersect the box around the
                        // current best distance, which lies inside `bound`.
                        *bound = shrunk;
                    }
                    ControlFlow::<()>::Continue(())
                });
                return search.best;
            }
        }
        for feature in self.scan() {
            search.offer(&feature);
        }
        search.best
    }

    /// Bounding box of all features, or `None` when no feature has a
    /// non-empty geometry.
    pub fn extent(&self) -> Option<Extent> {
        {
            let state = self.shared.state.borrow();
            if let Some(rtree) = &state.features_rtree {
                return rtree.extent().filter(|e| !e.is_empty());
            }
        }
        self.scan()
            .iter()
            .filter_map(|f| f.extent())
            .reduce(|a, b| a.union(&b))
            .filter(|e| !e.is_empty())
    }

    /// The feature holding `id`.
    pub fn feature_by_id(&self, id: impl Into<FeatureId>) -> Option<FeatureRef> {
        let id = id.into();
        self.shared.state.borrow().identity.get_by_id(&id).cloned()
    }

    /// Whether `feature` is in the store.
    pub fn contains(&self, feature: &Feature) -> bool {
        self.shared
            .state
            .borrow()
            .tracked
            .contains_key(&feature.handle())
    }

    /// Number of features in the store.
    pub fn len(&self) -> usize {
        self.shared.state.borrow().tracked.len()
    }

    /// True if the store holds no feature.
    pub fn is_empty(&self) -> bool {
        let state = self.shared.state.borrow();
        match &state.features_rtree {
            Some(rtree) => rtree.is_empty() && state.null_geometry.is_empty(),
            None => self
                .shared
                .binding
                .get()
                .is_none_or(|b| b.collection.is_empty()),
        }
    }

    // --- loading ---

    /// Request the features of `extent` at `resolution`.
    ///
    /// The strategy splits the request; every piece not contained in a
    /// previously requested extent is recorded and handed to the loader.
    /// Pieces are recorded before the loader runs, so a failed load is only
    /// retried after [`VectorStore::remove_loaded_extent`]. Returns the
    /// number of pieces issued.
    pub fn load_features(&self, extent: &Extent, resolution: f64, projection: &Projection) -> usize {
        let (pieces, loader) = {
            let loading = self.shared.loading.borrow();
            (
                loading.strategy.extents(extent, resolution),
                loading.loader.clone(),
            )
        };
        let mut issued = 0;
        for piece in pieces {
            {
                let mut loading = self.shared.loading.borrow_mut();
                if loading.loaded.is_loaded(&piece) {
                    trace!(?piece, "extent already loaded");
                    continue;
                }
                loading.loaded.mark_loaded(piece);
            }
            issued += 1;
            debug!(?piece, resolution, projection = projection.code(), "loading extent");
            if let Some(loader) = &loader {
                loader(&piece, resolution, projection);
            }
        }
        issued
    }

    /// Forget a previously loaded extent so it is fetched again.
    ///
    /// Only a record exactly equal to `extent` is removed.
    pub fn remove_loaded_extent(&self, extent: &Extent) -> bool {
        self.shared.loading.borrow_mut().loaded.unmark(extent)
    }

    /// The extents recorded as loaded, in unspecified order.
    pub fn loaded_extents(&self) -> Vec<Extent> {
        self.shared.loading.borrow().loaded.extents()
    }

    /// Replace the loader used by later loads.
    pub fn set_loader(&self, loader: impl Fn(&Extent, f64, &Projection) + 'static) {
        self.shared.loading.borrow_mut().loader = Some(Rc::new(loader));
    }

    // --- observation and accessors ---

    /// Register `f` for the events in `kinds`.
    pub fn subscribe(&self, kinds: StoreEventKinds, f: impl Fn(&StoreEvent) + 'static) -> ListenerKey {
        self.shared.observers.add((kinds, Rc::new(f)))
    }

    /// Unregister an observer. Returns false if `key` was not registered.
    pub fn unsubscribe(&self, key: ListenerKey) -> bool {
        self.shared.observers.remove(key)
    }

    /// Number of `Changed` notifications emitted so far.
    pub fn revision(&self) -> u64 {
        self.shared.revision.get()
    }

    /// The collection kept in sync with this store, if any.
    pub fn features_collection(&self) -> Option<Collection<FeatureRef>> {
        self.shared.binding.get().map(|b| b.collection.clone())
    }

    /// Whether features may overlap.
    pub fn overlaps(&self) -> bool {
        self.shared.overlaps
    }

    /// Whether the world wraps horizontally.
    pub fn wrap_x(&self) -> bool {
        self.shared.wrap_x
    }

    // --- internals ---

    fn insert_one(&self, feature: &FeatureRef) -> Result<bool> {
        let mut state = self.shared.state.borrow_mut();
        if !state.identity.add(feature)? {
            trace!(handle = ?feature.handle(), id = ?feature.id(), "skipped feature with a taken id");
            return Ok(false);
        }
        let handle = feature.handle();
        match feature.extent() {
            Some(extent) => {
                if let Some(rtree) = state.features_rtree.as_mut() {
                    rtree.insert(extent, handle);
                }
            }
            None => {
                state.null_geometry.insert(handle, feature.clone());
            }
        }
        state.tracked.insert(
            handle,
            Tracked {
                feature: feature.clone(),
                subscriptions: Some(self.subscribe_to(feature)),
            },
        );
        Ok(true)
    }

    fn insert_batch(&self, features: Vec<FeatureRef>) -> Result<Vec<FeatureRef>> {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;

        let mut accepted: Vec<FeatureRef> = Vec::with_capacity(features.len());
        for feature in features {
            match state.identity.add(&feature) {
                Ok(true) => accepted.push(feature),
                Ok(false) => {
                    trace!(handle = ?feature.handle(), id = ?feature.id(), "skipped feature with a taken id");
                }
                Err(err) => {
                    for filed in &accepted {
                        state.identity.remove(filed.handle());
                    }
                    return Err(err);
                }
            }
        }

        let mut entries = Vec::with_capacity(accepted.len());
        for feature in &accepted {
            let handle = feature.handle();
            match feature.extent() {
                Some(extent) => entries.push((extent, handle)),
                None => {
                    state.null_geometry.insert(handle, feature.clone());
                }
            }
            state.tracked.insert(
                handle,
                Tracked {
                    feature: feature.clone(),
                    subscriptions: Some(self.subscribe_to(feature)),
                },
            );
        }
        if let Some(rtree) = state.features_rtree.as_mut() {
            rtree.load(entries);
        }
        Ok(accepted)
    }

    /// Untrack `handle`. With `spatial`, the R-tree entry is dropped too;
    /// callers about to clear the tree skip that.
    fn detach(&self, handle: FeatureHandle, spatial: bool) -> Result<FeatureRef> {
        let mut guard = self.shared.state.borrow_mut();
        let state = &mut *guard;
        let mut tracked = state
            .tracked
            .remove(&handle)
            .ok_or(StoreError::NotFound(handle))?;
        tracked.release();
        if state.null_geometry.remove(&handle).is_none()
            && spatial
            && let Some(rtree) = state.features_rtree.as_mut()
        {
            let removed = rtree.remove(&handle);
            debug_assert!(removed.is_ok(), "tracked feature {handle:?} missing from the index");
        }
        state.identity.remove(handle);
        Ok(tracked.feature)
    }

    fn subscribe_to(&self, feature: &Feature) -> [ListenerKey; 2] {
        [
            feature.listen(
                ChangeKind::Geometry,
                change_listener(Rc::downgrade(&self.shared)),
            ),
            feature.listen(
                ChangeKind::Property,
                change_listener(Rc::downgrade(&self.shared)),
            ),
        ]
    }

    fn handle_feature_change(&self, handle: FeatureHandle) {
        let feature = {
            let mut guard = self.shared.state.borrow_mut();
            let state = &mut *guard;
            let Some(feature) = state.tracked.get(&handle).map(|t| t.feature.clone()) else {
                return;
            };
            match feature.extent() {
                None => {
                    if !state.null_geometry.contains_key(&handle) {
                        if let Some(rtree) = state.features_rtree.as_mut() {
                            let removed = rtree.remove(&handle);
                            debug_assert!(
                                removed.is_ok(),
                                "feature {handle:?} left the index before losing its geometry"
                            );
                        }
                        state.null_geometry.insert(handle, feature.clone());
                    }
                }
                Some(extent) => {
                    let was_null = state.null_geometry.remove(&handle).is_some();
                    if let Some(rtree) = state.features_rtree.as_mut() {
                        if was_null {
                            rtree.insert(extent, handle);
                        } else if rtree.update(extent, handle).is_err() {
                            rtree.insert(extent, handle);
                        }
                    }
                }
            }
            if let Some(displaced) = state.identity.on_identity_changed(&feature) {
                trace!(handle = ?displaced.handle(), "feature lost its id entry");
            }
            feature
        };
        self.changed();
        self.dispatch(StoreEvent::ChangeFeature(feature));
    }

    fn bind_collection(&self, collection: Collection<FeatureRef>) {
        let weak = Rc::downgrade(&self.shared);
        let listener = collection.listen(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let store = Self { shared };
            store.guard_collection(|| match event {
                CollectionEvent::Add(feature) => {
                    if let Err(err) = store.add_feature(feature.clone()) {
                        warn!(%err, "feature pushed onto the bound collection was not added");
                    }
                }
                CollectionEvent::Remove(feature) => {
                    if let Err(err) = store.remove_feature(feature) {
                        trace!(%err, "feature removed from the bound collection was not tracked");
                    }
                }
            });
        });
        if self
            .shared
            .binding
            .set(Binding {
                collection,
                listener,
            })
            .is_err()
        {
            warn!("store already bound to a collection");
        }
    }

    /// Run `f` unless a collection mirror is already in progress.
    fn guard_collection(&self, f: impl FnOnce()) {
        if self.shared.modifying_collection.replace(true) {
            return;
        }
        f();
        self.shared.modifying_collection.set(false);
    }

    fn dispatch(&self, event: StoreEvent) {
        if let Some(binding) = self.shared.binding.get() {
            match &event {
                StoreEvent::Add(feature) => {
                    self.guard_collection(|| binding.collection.push(feature.clone()));
                }
                StoreEvent::Remove(feature) => {
                    self.guard_collection(|| {
                        binding.collection.remove(feature);
                    });
                }
                _ => {}
            }
        }
        let kind = event.kind();
        for (kinds, observer) in self.shared.observers.snapshot() {
            if kinds.intersects(kind) {
                observer(&event);
            }
        }
    }

    fn changed(&self) {
        let revision = self.shared.revision.get() + 1;
        self.shared.revision.set(revision);
        self.dispatch(StoreEvent::Changed { revision });
    }

    /// Features whose bounding box intersects `extent`.
    fn candidates(&self, extent: &Extent) -> Vec<FeatureRef> {
        {
            let state = self.shared.state.borrow();
            if let Some(rtree) = &state.features_rtree {
                return state.resolve(rtree.in_extent(extent));
            }
        }
        self.scan()
            .into_iter()
            .filter(|f| f.extent().is_some_and(|e| e.intersects(extent)))
            .collect()
    }

    /// Content of the bound collection, which holds the features of a store
    /// without spatial index.
    fn scan(&self) -> Vec<FeatureRef> {
        self.features_collection()
            .map(|c| c.to_vec())
            .unwrap_or_default()
    }
}

fn change_listener(weak: Weak<Shared>) -> impl Fn(&Feature, ChangeKind) + 'static {
    move |feature, _kind| {
        if let Some(shared) = weak.upgrade() {
            VectorStore { shared }.handle_feature_change(feature.handle());
        }
    }
}

fn visit<B>(
    features: Vec<FeatureRef>,
    mut f: impl FnMut(&FeatureRef) -> ControlFlow<B>,
) -> Option<B> {
    for feature in &features {
        if let ControlFlow::Break(b) = f(feature) {
            return Some(b);
        }
    }
    None
}

/// Branch-and-bound state of a nearest-feature search.
struct NearestSearch<'a> {
    point: Point,
    filter: Option<&'a dyn Fn(&Feature) -> bool>,
    best: Option<FeatureRef>,
    distance_squared: f64,
    radius: f64,
}

impl NearestSearch<'_> {
    /// Consider `feature`; returns the tightened search box when it is the new
    /// nearest.
    fn offer(&mut self, feature: &FeatureRef) -> Option<Extent> {
        if self.filter.is_some_and(|keep| !keep(feature)) {
            return None;
        }
        let point = self.point;
        let hit = feature.with_geometry(|g| g.and_then(|g| g.closest_point(point)))?;
        if hit.distance_squared >= self.distance_squared {
            return None;
        }
        self.distance_squared = hit.distance_squared;
        // Never grow the box, even by a rounding step.
        self.radius = (hit.point - point).hypot().min(self.radius);
        self.best = Some(feature.clone());
        Some(Extent::around(point.x, point.y, self.radius))
    }
}

impl core::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("VectorStore")
            .field("features", &state.tracked.len())
            .field("null_geometry", &state.null_geometry.len())
            .field("index", &state.features_rtree)
            .field("bound_collection", &self.shared.binding.get().is_some())
            .field("revision", &self.shared.revision.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::strategy::Strategy;
    use alloc::string::String;
    use alloc::vec;
    use kurbo::Vec2;

    fn point(x: f64, y: f64) -> FeatureRef {
        Feature::new(Some(Geometry::Point(Point::new(x, y)))).shared()
    }

    fn point_with_id(id: &str, x: f64, y: f64) -> FeatureRef {
        Feature::with_id(id, Some(Geometry::Point(Point::new(x, y)))).shared()
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::Polygon(vec![vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]])
    }

    fn record(store: &VectorStore) -> Rc<RefCell<Vec<StoreEventKinds>>> {
        let log: Rc<RefCell<Vec<StoreEventKinds>>> = Rc::default();
        let l = log.clone();
        store.subscribe(StoreEventKinds::all(), move |e| l.borrow_mut().push(e.kind()));
        log
    }

    fn count(log: &RefCell<Vec<StoreEventKinds>>, kind: StoreEventKinds) -> usize {
        log.borrow().iter().filter(|k| **k == kind).count()
    }

    fn handles(mut features: Vec<FeatureRef>) -> Vec<FeatureHandle> {
        features.sort_by_key(|f| f.handle());
        features.into_iter().map(|f| f.handle()).collect()
    }

    #[test]
    fn first_holder_of_an_id_wins() {
        let store = VectorStore::new();
        let log = record(&store);
        let a = point_with_id("a", 0.0, 0.0);
        let b = point_with_id("a", 5.0, 5.0);
        assert_eq!(store.add_feature(a.clone()), Ok(true));
        assert_eq!(store.add_feature(b.clone()), Ok(false));
        assert_eq!(store.add_feature(a.clone()), Ok(false));
        assert_eq!(store.feature_by_id("a").map(|f| f.handle()), Some(a.handle()));
        assert_eq!(store.len(), 1);
        assert_eq!(count(&log, StoreEventKinds::ADD), 1);
        assert_eq!(b.listener_count(), 0, "rejected features are not observed");

        let anon = point(1.0, 1.0);
        store.add_feature(anon.clone()).unwrap();
        assert!(store.feature_by_id("1").is_none());
        assert_eq!(store.features_in_extent(&Extent::from_point(1.0, 1.0)).len(), 1);
    }

    #[test]
    fn anonymous_feature_added_twice_is_an_error() {
        let store = VectorStore::new();
        let f = point(0.0, 0.0);
        store.add_feature(f.clone()).unwrap();
        assert_eq!(
            store.add_feature(f.clone()),
            Err(StoreError::AlreadyAdded(f.handle()))
        );
        assert_eq!(f.listener_count(), 2);
    }

    #[test]
    fn batch_round_trip_skips_duplicates_and_emits_after_load() {
        let store = VectorStore::new();
        let mut batch: Vec<FeatureRef> = (0..50)
            .map(|i| point_with_id(&alloc::format!("f{i}"), f64::from(i), 0.0))
            .collect();
        batch.push(point_with_id("f3", 100.0, 100.0));
        batch.push(Feature::new(None).shared());
        let expected: Vec<FeatureRef> = batch
            .iter()
            .filter(|f| f.extent() != Some(Extent::from_point(100.0, 100.0)))
            .cloned()
            .collect();

        let seen_sizes: Rc<RefCell<Vec<usize>>> = Rc::default();
        let (s, inner) = (seen_sizes.clone(), store.clone());
        store.subscribe(StoreEventKinds::ADD, move |_| s.borrow_mut().push(inner.len()));
        let log = record(&store);

        assert_eq!(store.add_features(batch), Ok(51));
        assert!(seen_sizes.borrow().iter().all(|n| *n == 51), "adds follow the bulk update");
        assert_eq!(count(&log, StoreEventKinds::ADD), 51);
        assert_eq!(count(&log, StoreEventKinds::CHANGED), 1);
        assert_eq!(handles(store.features()), handles(expected));
    }

    #[test]
    fn failing_batch_keeps_nothing() {
        let store = VectorStore::new();
        let f = point(0.0, 0.0);
        let g = point_with_id("g", 1.0, 1.0);
        let err = store.add_features([g.clone(), f.clone(), f.clone()]);
        assert_eq!(err, Err(StoreError::AlreadyAdded(f.handle())));
        assert!(store.is_empty());
        assert!(store.feature_by_id("g").is_none());
        assert_eq!(f.listener_count(), 0);
        assert_eq!(store.add_features([g, f]), Ok(2));
    }

    #[test]
    fn extent_queries_match_bbox_brute_force() {
        let store = VectorStore::new();
        let mut all = Vec::new();
        for i in 0..20 {
            for j in 0..20 {
                let x = f64::from(i) * 7.0;
                let y = f64::from(j) * 5.0;
                all.push(Feature::new(Some(square(x, y, x + 3.0 + f64::from(i % 4), y + 2.0))).shared());
            }
        }
        store.add_features(all.iter().cloned()).unwrap();
        for q in [
            Extent::new(0.0, 0.0, 10.0, 10.0),
            Extent::new(33.3, 12.0, 80.1, 44.4),
            Extent::new(-10.0, -10.0, -1.0, -1.0),
            Extent::EVERYTHING,
        ] {
            let expected: Vec<FeatureRef> = all
                .iter()
                .filter(|f| f.extent().is_some_and(|e| e.intersects(&q)))
                .cloned()
                .collect();
            assert_eq!(handles(store.features_in_extent(&q)), handles(expected));
        }
    }

    #[test]
    fn coordinate_and_intersection_use_exact_geometry() {
        let store = VectorStore::new();
        let diagonal = Feature::new(Some(Geometry::LineString(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
        ])))
        .shared();
        let block = Feature::new(Some(square(6.0, 0.0, 10.0, 3.0))).shared();
        store.add_features([diagonal.clone(), block.clone()]).unwrap();

        let off_diagonal = Extent::new(7.0, 1.0, 8.0, 2.0);
        assert_eq!(store.features_in_extent(&off_diagonal).len(), 2);
        let mut exact = Vec::new();
        store.for_each_feature_intersecting_extent(&off_diagonal, |f| {
            exact.push(f.clone());
            ControlFlow::<()>::Continue(())
        });
        assert_eq!(handles(exact), vec![block.handle()]);

        let at = store.features_at_coordinate(Point::new(7.0, 1.0));
        assert_eq!(handles(at), vec![block.handle()]);
        let on_line = store.features_at_coordinate(Point::new(5.0, 5.0));
        assert_eq!(handles(on_line), vec![diagonal.handle()]);
    }

    #[test]
    fn closest_feature_branch_and_bound() {
        let store = VectorStore::new();
        let q = Point::new(100.0, 100.0);
        let d1 = point(101.0, 100.0);
        let d4 = point(100.0, 98.0);
        let d9 = point(97.0, 100.0);
        let mut batch = vec![d9.clone(), d1.clone(), d4.clone()];
        for i in 0..200 {
            batch.push(point(f64::from(i) * 3.0, -500.0));
        }
        store.add_features(batch).unwrap();

        assert_eq!(
            store.closest_feature_to_coordinate(q, None).map(|f| f.handle()),
            Some(d1.handle())
        );
        let not_d1 = |f: &Feature| f.handle() != d1.handle();
        assert_eq!(
            store
                .closest_feature_to_coordinate(q, Some(&not_d1))
                .map(|f| f.handle()),
            Some(d4.handle())
        );
        let none = |_: &Feature| false;
        assert!(store.closest_feature_to_coordinate(q, Some(&none)).is_none());
        assert!(VectorStore::new().closest_feature_to_coordinate(q, None).is_none());
    }

    #[test]
    fn unindexed_store_syncs_with_collection() {
        let store = VectorStore::with_options(StoreOptions {
            use_spatial_index: false,
            ..Default::default()
        })
        .unwrap();
        let collection = store.features_collection().expect("store without index owns a collection");
        let log = record(&store);

        let f = point(1.0, 2.0);
        collection.push(f.clone());
        assert_eq!(handles(store.features()), vec![f.handle()]);
        assert_eq!(collection.len(), 1, "no echo back into the collection");
        assert_eq!(count(&log, StoreEventKinds::ADD), 1);
        assert_eq!(store.features_in_extent(&Extent::new(0.0, 0.0, 5.0, 5.0)).len(), 1);
        assert!(store.features_in_extent(&Extent::new(10.0, 10.0, 20.0, 20.0)).is_empty());
        assert_eq!(store.extent(), Some(Extent::from_point(1.0, 2.0)));

        let g = point(3.0, 3.0);
        store.add_feature(g.clone()).unwrap();
        assert_eq!(collection.len(), 2);

        store.remove_feature(&f).unwrap();
        assert_eq!(collection.to_vec().len(), 1);
        assert_eq!(handles(store.features()), vec![g.handle()]);
        assert_eq!(count(&log, StoreEventKinds::REMOVE), 1);
        assert_eq!(
            store.closest_feature_to_coordinate(Point::ORIGIN, None).map(|f| f.handle()),
            Some(g.handle())
        );
    }

    #[test]
    fn indexed_store_bound_to_collection() {
        let a = point(0.0, 0.0);
        let collection = Collection::from_vec(vec![a.clone()]);
        let store = VectorStore::with_options(StoreOptions {
            features: InitialFeatures::Collection(collection.clone()),
            ..Default::default()
        })
        .unwrap();
        assert!(store.contains(&a));
        assert_eq!(collection.len(), 1, "seeding does not echo");

        let b = point(5.0, 5.0);
        store.add_feature(b.clone()).unwrap();
        assert_eq!(collection.len(), 2);
        collection.remove(&a);
        assert!(!store.contains(&a));
        assert_eq!(store.features_in_extent(&Extent::EVERYTHING).len(), 1);
    }

    #[test]
    fn loader_runs_once_per_uncovered_extent() {
        let calls: Rc<RefCell<Vec<Extent>>> = Rc::default();
        let c = calls.clone();
        let store = VectorStore::with_options(StoreOptions {
            strategy: Box::new(Strategy::Bbox),
            loader: Some(Rc::new(move |e: &Extent, _res: f64, _proj: &Projection| {
                c.borrow_mut().push(*e);
            })),
            ..Default::default()
        })
        .unwrap();
        let proj = Projection::default();
        let a = Extent::new(0.0, 0.0, 100.0, 100.0);

        assert_eq!(store.load_features(&a, 1.0, &proj), 1);
        assert_eq!(store.load_features(&Extent::new(10.0, 10.0, 20.0, 20.0), 1.0, &proj), 0);
        assert_eq!(calls.borrow().len(), 1);

        assert!(store.remove_loaded_extent(&a));
        assert_eq!(store.load_features(&a, 1.0, &proj), 1);
        assert_eq!(*calls.borrow(), [a, a]);

        // Partial overlap is not covered.
        assert_eq!(store.load_features(&Extent::new(50.0, 50.0, 150.0, 150.0), 1.0, &proj), 1);
    }

    #[test]
    fn default_strategy_loads_everything_once() {
        let store = VectorStore::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        store.set_loader(move |e, _, _| {
            assert_eq!(*e, Extent::EVERYTHING);
            c.set(c.get() + 1);
        });
        let proj = Projection::new("EPSG:4326");
        store.load_features(&Extent::new(0.0, 0.0, 1.0, 1.0), 1.0, &proj);
        store.load_features(&Extent::new(-1e9, -1e9, 1e9, 1e9), 0.1, &proj);
        assert_eq!(calls.get(), 1);
        assert_eq!(store.loaded_extents(), [Extent::EVERYTHING]);
    }

    #[test]
    fn loader_may_add_and_reload_synchronously() {
        let store = VectorStore::with_options(StoreOptions {
            strategy: Box::new(Strategy::Bbox),
            ..Default::default()
        })
        .unwrap();
        let inner = store.clone();
        store.set_loader(move |e, res, proj| {
            inner
                .add_feature(point_with_id("remote", e.min_x, e.min_y))
                .unwrap();
            // Re-entrant request for the same extent is already recorded.
            assert_eq!(inner.load_features(e, res, proj), 0);
        });
        let proj = Projection::default();
        store.load_features(&Extent::new(0.0, 0.0, 10.0, 10.0), 1.0, &proj);
        store.load_features(&Extent::new(20.0, 0.0, 30.0, 10.0), 1.0, &proj);
        assert_eq!(store.len(), 1, "the second load is deduplicated by id");
    }

    #[test]
    fn fast_clear_skips_removes_and_releases_subscriptions() {
        let store = VectorStore::new();
        let features: Vec<FeatureRef> = (0..10).map(|i| point(f64::from(i), 0.0)).collect();
        store.add_features(features.iter().cloned()).unwrap();
        store.add_feature(Feature::new(None).shared()).unwrap();
        store.load_features(&Extent::new(0.0, 0.0, 1.0, 1.0), 1.0, &Projection::default());
        let log = record(&store);

        store.clear(true);
        assert!(store.is_empty());
        assert!(store.features().is_empty());
        assert_eq!(count(&log, StoreEventKinds::REMOVE), 0);
        assert_eq!(count(&log, StoreEventKinds::CLEAR), 1);
        assert_eq!(count(&log, StoreEventKinds::CHANGED), 1);
        assert!(features.iter().all(|f| f.listener_count() == 0));
        assert!(store.loaded_extents().is_empty());
    }

    #[test]
    fn slow_clear_emits_one_remove_per_feature() {
        let store = VectorStore::new();
        let mut features: Vec<FeatureRef> = (0..10).map(|i| point(f64::from(i), 0.0)).collect();
        features.push(Feature::new(None).shared());
        store.add_features(features.iter().cloned()).unwrap();
        let removed: Rc<RefCell<Vec<FeatureHandle>>> = Rc::default();
        let r = removed.clone();
        store.subscribe(StoreEventKinds::REMOVE, move |e| {
            if let Some(f) = e.feature() {
                r.borrow_mut().push(f.handle());
            }
        });

        store.clear(false);
        removed.borrow_mut().sort();
        assert_eq!(*removed.borrow(), handles(features.clone()));
        assert!(store.is_empty());
        assert!(features.iter().all(|f| f.listener_count() == 0));
    }

    #[test]
    fn fast_clear_with_bound_collection_follows_the_collection() {
        let store = VectorStore::with_options(StoreOptions {
            use_spatial_index: false,
            features: InitialFeatures::Features(vec![point(0.0, 0.0), point(1.0, 1.0)]),
            ..Default::default()
        })
        .unwrap();
        let collection = store.features_collection().unwrap();
        assert_eq!(collection.len(), 2);
        let log = record(&store);
        store.clear(true);
        assert!(collection.is_empty());
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(count(&log, StoreEventKinds::REMOVE), 2);
        assert_eq!(count(&log, StoreEventKinds::CLEAR), 1);
    }

    #[test]
    fn feature_edits_move_index_entries() {
        let store = VectorStore::new();
        let f = point(0.0, 0.0);
        store.add_feature(f.clone()).unwrap();
        let log = record(&store);
        let rev = store.revision();

        f.update_geometry(|g| g.translate(Vec2::new(50.0, 0.0)));
        assert!(store.features_in_extent(&Extent::from_point(0.0, 0.0)).is_empty());
        assert_eq!(store.features_in_extent(&Extent::from_point(50.0, 0.0)).len(), 1);
        assert_eq!(
            *log.borrow(),
            [StoreEventKinds::CHANGED, StoreEventKinds::CHANGE_FEATURE]
        );
        assert_eq!(store.revision(), rev + 1);

        f.set_geometry(None);
        assert!(store.features_in_extent(&Extent::EVERYTHING).is_empty());
        assert_eq!(store.features().len(), 1);
        assert!(store.for_each_feature(|_| ControlFlow::Break(())).is_none());
        assert_eq!(store.extent(), None);

        f.set_geometry(Some(Geometry::Point(Point::new(7.0, 7.0))));
        assert_eq!(store.extent(), Some(Extent::from_point(7.0, 7.0)));
        assert!(store.for_each_feature(|_| ControlFlow::Break(())).is_some());
    }

    #[test]
    fn id_changes_are_tracked() {
        let store = VectorStore::new();
        let f = point(0.0, 0.0);
        store.add_feature(f.clone()).unwrap();
        f.set_id(Some("late".into()));
        assert_eq!(store.feature_by_id("late").map(|g| g.handle()), Some(f.handle()));
        f.set_id(Some(7_u32.into()));
        assert!(store.feature_by_id("late").is_none());
        assert!(store.feature_by_id(7).is_some());
        // A later duplicate is now rejected.
        assert_eq!(store.add_feature(point_with_id("7", 1.0, 1.0)), Ok(false));
    }

    #[test]
    fn removed_features_are_no_longer_observed() {
        let store = VectorStore::new();
        let f = point(0.0, 0.0);
        store.add_feature(f.clone()).unwrap();
        store.remove_feature(&f).unwrap();
        assert_eq!(store.remove_feature(&f), Err(StoreError::NotFound(f.handle())));
        let rev = store.revision();
        f.set_property("name", String::from("ignored"));
        assert_eq!(store.revision(), rev);
        assert_eq!(f.listener_count(), 0);
    }

    #[test]
    fn dropping_the_store_releases_listeners() {
        let collection: Collection<FeatureRef> = Collection::new();
        let f = point(0.0, 0.0);
        {
            let store = VectorStore::with_options(StoreOptions {
                features: InitialFeatures::Collection(collection.clone()),
                ..Default::default()
            })
            .unwrap();
            store.add_feature(f.clone()).unwrap();
            assert_eq!(collection.listener_count(), 1);
            assert_eq!(f.listener_count(), 2);
        }
        assert_eq!(collection.listener_count(), 0);
        assert_eq!(f.listener_count(), 0);
    }

    #[test]
    fn observers_filter_by_kind_and_unsubscribe() {
        let store = VectorStore::with_options(StoreOptions {
            overlaps: false,
            wrap_x: false,
            ..Default::default()
        })
        .unwrap();
        assert!(!store.overlaps());
        assert!(!store.wrap_x());
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let key = store.subscribe(StoreEventKinds::CLEAR, move |_| h.set(h.get() + 1));
        store.add_feature(point(0.0, 0.0)).unwrap();
        store.clear(true);
        assert_eq!(hits.get(), 1);
        assert!(store.unsubscribe(key));
        store.clear(true);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn features_with_empty_geometry_are_indexed_but_never_hit() {
        let store = VectorStore::new();
        let batch: Vec<FeatureRef> = (0..2000_u32)
            .map(|i| {
                if i % 3 == 0 {
                    Feature::new(Some(Geometry::LineString(vec![]))).shared()
                } else {
                    point(f64::from(i % 50) * 2.0, f64::from(i / 50) * 2.0)
                }
            })
            .collect();
        assert_eq!(store.add_features(batch.iter().cloned()), Ok(2000));
        for i in 0..40 {
            let single = if i % 2 == 0 {
                Feature::new(Some(Geometry::LineString(vec![]))).shared()
            } else {
                point(f64::from(i), -1.0)
            };
            assert_eq!(store.add_feature(single), Ok(true));
        }
        assert_eq!(store.len(), 2040);

        let q = Extent::new(10.0, 10.0, 30.0, 30.0);
        let expected: Vec<FeatureRef> = batch
            .iter()
            .filter(|f| f.extent().is_some_and(|e| e.intersects(&q)))
            .cloned()
            .collect();
        assert!(!expected.is_empty());
        assert_eq!(handles(store.features_in_extent(&q)), handles(expected));
        assert_eq!(store.extent(), Some(Extent::new(0.0, -1.0, 98.0, 78.0)));

        for f in batch.iter().step_by(3).take(200) {
            store.remove_feature(f).unwrap();
        }
        assert_eq!(store.len(), 1840);
    }

    #[test]
    fn unindexed_store_seeds_its_collection_with_accepted_features_only() {
        let first = point_with_id("x", 0.0, 0.0);
        let second = point_with_id("x", 9.0, 9.0);
        let store = VectorStore::with_options(StoreOptions {
            use_spatial_index: false,
            features: InitialFeatures::Features(vec![first.clone(), second.clone()]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.features().len(), 1);
        assert!(store.contains(&first));
        assert!(!store.contains(&second));
        let closest = store.closest_feature_to_coordinate(Point::new(9.0, 9.0), None);
        assert_eq!(closest.map(|f| f.handle()), Some(first.handle()));
    }

    #[test]
    fn geometry_round_trip_through_none_keeps_the_index_consistent() {
        let store = VectorStore::new();
        let f = point(3.0, 3.0);
        let other = point(50.0, 50.0);
        store.add_features([f.clone(), other.clone()]).unwrap();

        f.set_geometry(None);
        assert_eq!(
            handles(store.features_in_extent(&Extent::EVERYTHING)),
            handles(vec![other.clone()])
        );
        f.set_geometry(Some(Geometry::Point(Point::new(4.0, 4.0))));
        assert_eq!(
            handles(store.features_in_extent(&Extent::new(0.0, 0.0, 5.0, 5.0))),
            handles(vec![f.clone()])
        );

        store.remove_feature(&f).unwrap();
        store.remove_feature(&other).unwrap();
        assert!(store.is_empty());
        assert!(store.features_in_extent(&Extent::EVERYTHING).is_empty());
        assert_eq!(store.extent(), None);
    }

    #[test]
    fn batch_of_duplicates_still_reports_a_change() {
        let store = VectorStore::new();
        store.add_feature(point_with_id("a", 0.0, 0.0)).unwrap();
        let log = record(&store);
        let before = store.revision();
        let duplicates = [point_with_id("a", 1.0, 1.0), point_with_id("a", 2.0, 2.0)];
        assert_eq!(store.add_features(duplicates), Ok(0));
        assert_eq!(count(&log, StoreEventKinds::ADD), 0);
        assert_eq!(count(&log, StoreEventKinds::CHANGED), 1);
        assert_eq!(store.revision(), before + 1);
        assert_eq!(store.len(), 1);
    }
}
