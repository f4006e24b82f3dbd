// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Identity index: id lookup and uniqueness of features in a store.

use alloc::collections::BTreeMap;
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::feature::{Feature, FeatureHandle, FeatureId, FeatureRef};

/// Where a feature is filed in the [`IdentityIndex`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Identity {
    /// Filed under its caller-supplied id.
    WithId(FeatureId),
    /// No id; filed under its handle.
    Anonymous(FeatureHandle),
}

impl Identity {
    /// The identity `feature` should currently be filed under.
    pub fn of(feature: &Feature) -> Self {
        match feature.id() {
            Some(id) => Self::WithId(id),
            None => Self::Anonymous(feature.handle()),
        }
    }
}

/// Index moves needed to bring a filed feature in line with its current identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Migration {
    /// Already filed correctly.
    Stay,
    /// Drop the `from` entry and file under `to`.
    Move {
        /// Entry to drop.
        from: Identity,
        /// Entry to create.
        to: Identity,
    },
}

/// Compute the migration from the `recorded` placement to `current`.
pub fn transition(recorded: &Identity, current: &Identity) -> Migration {
    if recorded == current {
        Migration::Stay
    } else {
        Migration::Move {
            from: recorded.clone(),
            to: current.clone(),
        }
    }
}

/// Two mappings, by id and by handle, with each tracked feature in exactly one.
#[derive(Clone, Debug, Default)]
pub struct IdentityIndex {
    by_id: BTreeMap<FeatureId, FeatureRef>,
    by_key: BTreeMap<FeatureHandle, FeatureRef>,
    placement: BTreeMap<FeatureHandle, Identity>,
}

impl IdentityIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// File `feature` under its identity.
    ///
    /// Returns `Ok(false)` without filing anything when the feature's id is
    /// already taken; this is how duplicate loads are deduplicated. Returns
    /// [`StoreError::AlreadyAdded`] when a feature without an id is already filed.
    pub fn add(&mut self, feature: &FeatureRef) -> Result<bool> {
        let handle = feature.handle();
        match Identity::of(feature) {
            Identity::WithId(id) => {
                if self.by_id.contains_key(&id) {
                    return Ok(false);
                }
                self.by_id.insert(id.clone(), feature.clone());
                self.placement.insert(handle, Identity::WithId(id));
            }
            Identity::Anonymous(key) => {
                if self.by_key.contains_key(&key) {
                    return Err(StoreError::AlreadyAdded(handle));
                }
                self.by_key.insert(key, feature.clone());
                self.placement.insert(handle, Identity::Anonymous(key));
            }
        }
        Ok(true)
    }

    /// Remove the entry filed for `handle`.
    pub fn remove(&mut self, handle: FeatureHandle) -> Option<FeatureRef> {
        match self.placement.remove(&handle)? {
            Identity::WithId(id) => self.by_id.remove(&id),
            Identity::Anonymous(key) => self.by_key.remove(&key),
        }
    }

    /// Re-file a tracked feature after its id may have changed.
    ///
    /// When the new id is held by another feature, `feature` takes the entry
    /// and the other feature is re-filed under its handle; that feature is
    /// returned. Untracked features are ignored.
    pub fn on_identity_changed(&mut self, feature: &FeatureRef) -> Option<FeatureRef> {
        let handle = feature.handle();
        let recorded = self.placement.get(&handle)?.clone();
        let Migration::Move { from, to } = transition(&recorded, &Identity::of(feature)) else {
            return None;
        };

        match from {
            Identity::WithId(old) => {
                if self.by_id.get(&old).is_some_and(|f| f.handle() == handle) {
                    self.by_id.remove(&old);
                }
            }
            Identity::Anonymous(key) => {
                self.by_key.remove(&key);
            }
        }

        match to {
            Identity::WithId(id) => {
                let displaced = self
                    .by_id
                    .insert(id.clone(), feature.clone())
                    .filter(|prev| prev.handle() != handle);
                self.placement.insert(handle, Identity::WithId(id.clone()));
                if let Some(prev) = &displaced {
                    let prev_handle = prev.handle();
                    warn!(%id, ?handle, displaced = ?prev_handle, "id reassigned to another feature");
                    self.by_key.insert(prev_handle, prev.clone());
                    self.placement
                        .insert(prev_handle, Identity::Anonymous(prev_handle));
                }
                displaced
            }
            Identity::Anonymous(key) => {
                self.by_key.insert(key, feature.clone());
                self.placement.insert(handle, Identity::Anonymous(key));
                None
            }
        }
    }

    /// The feature filed under `id`.
    pub fn get_by_id(&self, id: &FeatureId) -> Option<&FeatureRef> {
        self.by_id.get(id)
    }

    /// Where `handle` is filed.
    pub fn identity_of(&self, handle: FeatureHandle) -> Option<&Identity> {
        self.placement.get(&handle)
    }

    /// Whether `handle` is filed.
    pub fn contains(&self, handle: FeatureHandle) -> bool {
        self.placement.contains_key(&handle)
    }

    /// Number of filed features.
    pub fn len(&self) -> usize {
        self.placement.len()
    }

    /// True if nothing is filed.
    pub fn is_empty(&self) -> bool {
        self.placement.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
        self.placement.clear();
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        assert_eq!(
            self.by_id.len() + self.by_key.len(),
            self.placement.len(),
            "each feature is in exactly one mapping"
        );
        for (handle, identity) in &self.placement {
            let filed = match identity {
                Identity::WithId(id) => self.by_id.get(id),
                Identity::Anonymous(key) => self.by_key.get(key),
            };
            assert_eq!(filed.map(|f| f.handle()), Some(*handle), "placement points at its entry");
        }
    }
}
