// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Store notifications and the listener registry shared by features,
//! collections, and the store.

use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use crate::feature::FeatureRef;

/// Handle returned when registering a listener, used to unregister it.
///
/// Keys are scoped to the object that issued them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerKey(u64);

bitflags::bitflags! {
    /// Mask of [`StoreEvent`] kinds an observer is interested in.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StoreEventKinds: u8 {
        /// [`StoreEvent::Add`].
        const ADD            = 0b0000_0001;
        /// [`StoreEvent::Remove`].
        const REMOVE         = 0b0000_0010;
        /// [`StoreEvent::ChangeFeature`].
        const CHANGE_FEATURE = 0b0000_0100;
        /// [`StoreEvent::Clear`].
        const CLEAR          = 0b0000_1000;
        /// [`StoreEvent::Changed`].
        const CHANGED        = 0b0001_0000;
    }
}

impl Default for StoreEventKinds {
    fn default() -> Self {
        Self::all()
    }
}

/// Notification emitted by a [`VectorStore`](crate::VectorStore).
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// A feature was accepted into the store.
    Add(FeatureRef),
    /// A feature left the store.
    Remove(FeatureRef),
    /// A tracked feature signalled a geometry or property change.
    ChangeFeature(FeatureRef),
    /// The store was cleared.
    Clear,
    /// Generic "something changed" signal; `revision` is the new store revision.
    Changed {
        /// Revision after the change.
        revision: u64,
    },
}

impl StoreEvent {
    /// The mask bit for this event.
    pub fn kind(&self) -> StoreEventKinds {
        match self {
            Self::Add(_) => StoreEventKinds::ADD,
            Self::Remove(_) => StoreEventKinds::REMOVE,
            Self::ChangeFeature(_) => StoreEventKinds::CHANGE_FEATURE,
            Self::Clear => StoreEventKinds::CLEAR,
            Self::Changed { .. } => StoreEventKinds::CHANGED,
        }
    }

    /// The feature this event is about, if any.
    pub fn feature(&self) -> Option<&FeatureRef> {
        match self {
            Self::Add(f) | Self::Remove(f) | Self::ChangeFeature(f) => Some(f),
            Self::Clear | Self::Changed { .. } => None,
        }
    }
}

/// Ordered listener list.
///
/// Dispatch goes through [`Listeners::snapshot`] so callbacks may register or
/// unregister listeners while an event is being delivered.
pub(crate) struct Listeners<L> {
    next: Cell<u64>,
    entries: RefCell<Vec<(ListenerKey, L)>>,
}

impl<L: Clone> Listeners<L> {
    pub(crate) fn new() -> Self {
        Self {
            next: Cell::new(1),
            entries: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: L) -> ListenerKey {
        let key = ListenerKey(self.next.get());
        self.next.set(key.0 + 1);
        self.entries.borrow_mut().push((key, listener));
        key
    }

    pub(crate) fn remove(&self, key: ListenerKey) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(k, _)| *k != key);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<L> {
        self.entries.borrow().iter().map(|(_, l)| l.clone()).collect()
    }
}

impl<L> core::fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.borrow().len())
            .finish_non_exhaustive()
    }
}
