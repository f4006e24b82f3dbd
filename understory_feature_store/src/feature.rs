// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Features: a geometry plus an optional id and properties, observable for
//! changes.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::Extent;
use crate::event::{ListenerKey, Listeners};
use crate::geometry::Geometry;

/// Shared reference to a feature, as held by stores and collections.
pub type FeatureRef = Rc<Feature>;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a feature, assigned on construction.
///
/// Unlike [`FeatureId`], which is supplied by the data source and may change,
/// a handle never changes and is never reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureHandle(u64);

impl FeatureHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw handle value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Caller-supplied feature identifier.
///
/// Ids compare as strings: numeric ids are stored in their decimal form, so
/// `FeatureId::from(2)` and `FeatureId::from("2")` are the same id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(String);

impl FeatureId {
    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

macro_rules! feature_id_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FeatureId {
            fn from(v: $t) -> Self {
                Self(v.to_string())
            }
        })*
    };
}

feature_id_from_int!(i32, i64, u32, u64, usize);

/// Value of a feature property.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(String),
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Number(v.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.into())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Kind of change a feature signals.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The geometry was replaced or edited, or the feature was marked changed.
    Geometry,
    /// The id or a property changed.
    Property,
}

type ChangeListener = Rc<dyn Fn(&Feature, ChangeKind)>;

#[derive(Clone, Debug, Default)]
struct FeatureState {
    id: Option<FeatureId>,
    geometry: Option<Geometry>,
    properties: BTreeMap<String, PropertyValue>,
}

/// A geometry plus an optional id and properties.
///
/// All setters take `&self` and notify listeners after the mutation, so a
/// feature can be shared as [`FeatureRef`] between a store, a collection, and
/// the code editing it.
pub struct Feature {
    handle: FeatureHandle,
    state: RefCell<FeatureState>,
    listeners: Listeners<(ChangeKind, ChangeListener)>,
}

impl Feature {
    /// Create a feature without an id.
    pub fn new(geometry: Option<Geometry>) -> Self {
        Self {
            handle: FeatureHandle::next(),
            state: RefCell::new(FeatureState {
                geometry,
                ..Default::default()
            }),
            listeners: Listeners::new(),
        }
    }

    /// Create a feature with an id.
    pub fn with_id(id: impl Into<FeatureId>, geometry: Option<Geometry>) -> Self {
        let feature = Self::new(geometry);
        feature.state.borrow_mut().id = Some(id.into());
        feature
    }

    /// Wrap into a shared [`FeatureRef`].
    pub fn shared(self) -> FeatureRef {
        Rc::new(self)
    }

    /// The process-unique handle.
    pub fn handle(&self) -> FeatureHandle {
        self.handle
    }

    /// The caller-supplied id, if any.
    pub fn id(&self) -> Option<FeatureId> {
        self.state.borrow().id.clone()
    }

    /// A copy of the geometry.
    pub fn geometry(&self) -> Option<Geometry> {
        self.state.borrow().geometry.clone()
    }

    /// Run `f` against the geometry without copying it.
    pub fn with_geometry<R>(&self, f: impl FnOnce(Option<&Geometry>) -> R) -> R {
        f(self.state.borrow().geometry.as_ref())
    }

    /// Bounding box of the geometry, or `None` for a null geometry.
    pub fn extent(&self) -> Option<Extent> {
        self.with_geometry(|g| g.map(Geometry::extent))
    }

    /// A copy of property `key`.
    pub fn property(&self, key: &str) -> Option<PropertyValue> {
        self.state.borrow().properties.get(key).cloned()
    }

    /// Replace the geometry.
    pub fn set_geometry(&self, geometry: Option<Geometry>) {
        self.state.borrow_mut().geometry = geometry;
        self.emit(ChangeKind::Geometry);
    }

    /// Edit the geometry in place. Does nothing for a null geometry.
    pub fn update_geometry(&self, f: impl FnOnce(&mut Geometry)) {
        let edited = match self.state.borrow_mut().geometry.as_mut() {
            Some(g) => {
                f(g);
                true
            }
            None => false,
        };
        if edited {
            self.emit(ChangeKind::Geometry);
        }
    }

    /// Assign or clear the id.
    pub fn set_id(&self, id: Option<FeatureId>) {
        self.state.borrow_mut().id = id;
        self.emit(ChangeKind::Property);
    }

    /// Set property `key`.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.state
            .borrow_mut()
            .properties
            .insert(key.into(), value.into());
        self.emit(ChangeKind::Property);
    }

    /// Remove property `key`, returning its old value.
    pub fn remove_property(&self, key: &str) -> Option<PropertyValue> {
        let old = self.state.borrow_mut().properties.remove(key);
        if old.is_some() {
            self.emit(ChangeKind::Property);
        }
        old
    }

    /// Signal a change without mutating anything, e.g. after editing shared
    /// data the feature refers to.
    pub fn changed(&self) {
        self.emit(ChangeKind::Geometry);
    }

    /// Register `f` for changes of `kind`.
    pub fn listen(&self, kind: ChangeKind, f: impl Fn(&Self, ChangeKind) + 'static) -> ListenerKey {
        self.listeners.add((kind, Rc::new(f)))
    }

    /// Unregister a listener. Returns false if `key` was not registered.
    pub fn unlisten(&self, key: ListenerKey) -> bool {
        self.listeners.remove(key)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit(&self, kind: ChangeKind) {
        for (k, listener) in self.listeners.snapshot() {
            if k == kind {
                listener(self, kind);
            }
        }
    }
}

impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Feature {}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Feature")
            .field("handle", &self.handle)
            .field("id", &state.id)
            .field("geometry", &state.geometry)
            .field("properties", &state.properties.len())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::cell::Cell;
    use kurbo::{Point, Vec2};

    #[test]
    fn handles_are_unique() {
        let a = Feature::new(None);
        let b = Feature::new(None);
        assert_ne!(a.handle(), b.handle());
        assert_ne!(a, b);
    }

    #[test]
    fn numeric_and_string_ids_coincide() {
        assert_eq!(FeatureId::from(2), FeatureId::from("2"));
        let f = Feature::with_id(42_u64, None);
        assert_eq!(f.id().unwrap().as_str(), "42");
    }

    #[test]
    fn setters_emit_their_kind() {
        let f = Feature::new(Some(Geometry::Point(Point::new(1.0, 1.0))));
        let seen: Rc<RefCell<Vec<ChangeKind>>> = Rc::default();
        let s = seen.clone();
        let kg = f.listen(ChangeKind::Geometry, move |_, k| s.borrow_mut().push(k));
        let s = seen.clone();
        let kp = f.listen(ChangeKind::Property, move |_, k| s.borrow_mut().push(k));

        f.update_geometry(|g| g.translate(Vec2::new(1.0, 0.0)));
        f.set_property("name", "a");
        f.set_id(Some("x".into()));
        assert_eq!(f.remove_property("missing"), None);
        assert_eq!(
            *seen.borrow(),
            [ChangeKind::Geometry, ChangeKind::Property, ChangeKind::Property]
        );
        assert_eq!(f.extent(), Some(Extent::from_point(2.0, 1.0)));

        assert!(f.unlisten(kg));
        assert!(f.unlisten(kp));
        assert_eq!(f.listener_count(), 0);
    }

    #[test]
    fn listener_may_read_the_feature() {
        let f = Feature::with_id("a", None);
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        f.listen(ChangeKind::Geometry, move |feature, _| {
            if feature.geometry().is_some() {
                h.set(h.get() + 1);
            }
        });
        f.set_geometry(Some(Geometry::Point(Point::ORIGIN)));
        f.update_geometry(|_| {});
        assert_eq!(hits.get(), 2);
        assert_eq!(f.property("name"), None);
    }
}
