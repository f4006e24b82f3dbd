// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An observable ordered collection.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::ops::ControlFlow;

use crate::event::{ListenerKey, Listeners};

/// Change notification of a [`Collection`].
#[derive(Clone, Debug, PartialEq)]
pub enum CollectionEvent<T> {
    /// `T` was inserted.
    Add(T),
    /// `T` was removed.
    Remove(T),
}

type CollectionListener<T> = Rc<dyn Fn(&CollectionEvent<T>)>;

struct Inner<T> {
    items: RefCell<Vec<T>>,
    listeners: Listeners<CollectionListener<T>>,
}

/// Ordered list that notifies listeners on every insertion and removal.
///
/// `Collection` is a cheap shared handle: clones refer to the same list.
/// Listeners run after the list has been updated and may freely mutate it.
pub struct Collection<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> Collection<T> {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Create a collection holding `items`. No events are emitted.
    pub fn from_vec(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(Inner {
                items: RefCell::new(items),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Whether both handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// True if the collection holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// A copy of the item at `index`.
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    /// A copy of all items, in order.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    /// Append `item`.
    pub fn push(&self, item: T) {
        self.inner.items.borrow_mut().push(item.clone());
        self.emit(&CollectionEvent::Add(item));
    }

    /// Insert `item` at `index`, clamped to the current length.
    pub fn insert_at(&self, index: usize, item: T) {
        {
            let mut items = self.inner.items.borrow_mut();
            let index = index.min(items.len());
            items.insert(index, item.clone());
        }
        self.emit(&CollectionEvent::Add(item));
    }

    /// Remove the first item equal to `item`.
    pub fn remove(&self, item: &T) -> Option<T> {
        let index = self.inner.items.borrow().iter().position(|i| i == item)?;
        self.remove_at(index)
    }

    /// Remove the item at `index`.
    pub fn remove_at(&self, index: usize) -> Option<T> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        }?;
        self.emit(&CollectionEvent::Remove(removed.clone()));
        Some(removed)
    }

    /// Remove the last item.
    pub fn pop(&self) -> Option<T> {
        let len = self.len();
        len.checked_sub(1).and_then(|last| self.remove_at(last))
    }

    /// Remove every item from the back, emitting a `Remove` for each.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }

    /// Visit the items in order, with early exit.
    ///
    /// Iterates over a snapshot, so the callback may mutate the collection.
    pub fn for_each<B>(&self, mut f: impl FnMut(&T) -> ControlFlow<B>) -> Option<B> {
        for item in self.to_vec() {
            if let ControlFlow::Break(b) = f(&item) {
                return Some(b);
            }
        }
        None
    }

    /// Register a listener for insertions and removals.
    pub fn listen(&self, f: impl Fn(&CollectionEvent<T>) + 'static) -> ListenerKey {
        self.inner.listeners.add(Rc::new(f))
    }

    /// Unregister a listener. Returns false if `key` was not registered.
    pub fn unlisten(&self, key: ListenerKey) -> bool {
        self.inner.listeners.remove(key)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn emit(&self, event: &CollectionEvent<T>) {
        for listener in self.inner.listeners.snapshot() {
            listener(event);
        }
    }
}

impl<T> core::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Collection")
            .field("len", &self.inner.items.borrow().len())
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}
