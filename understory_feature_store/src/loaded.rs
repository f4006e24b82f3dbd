// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracking of extents whose features have already been requested.

use alloc::vec::Vec;
use core::ops::ControlFlow;

use understory_rtree::RTree;

use crate::Extent;

/// Record of loaded extents, backed by its own R-tree.
///
/// Extents are recorded exactly as given: overlapping or adjacent records are
/// never merged, and an extent only counts as loaded when a single record
/// contains it.
#[derive(Debug, Default)]
pub struct LoadedExtents {
    tree: RTree<f64, u64>,
    next: u64,
}

impl LoadedExtents {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `extent` as loaded.
    pub fn mark_loaded(&mut self, extent: Extent) {
        self.tree.insert(extent, self.next);
        self.next += 1;
    }

    /// Whether some recorded extent contains `extent`.
    pub fn is_loaded(&self, extent: &Extent) -> bool {
        self.tree
            .for_each_in_extent(extent, |key| {
                if self.tree.bbox_of(&key).is_some_and(|r| r.contains(extent)) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .is_some()
    }

    /// Forget the first record exactly equal to `extent`.
    ///
    /// Returns false if no record matched.
    pub fn unmark(&mut self, extent: &Extent) -> bool {
        let found = self.tree.for_each_in_extent(extent, |key| {
            if self.tree.bbox_of(&key) == Some(*extent) {
                ControlFlow::Break(key)
            } else {
                ControlFlow::Continue(())
            }
        });
        found.is_some_and(|key| self.tree.remove(&key).is_ok())
    }

    /// The recorded extents, in unspecified order.
    pub fn extents(&self) -> Vec<Extent> {
        self.tree
            .all()
            .into_iter()
            .filter_map(|key| self.tree.bbox_of(&key))
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Forget every record.
    pub fn clear(&mut self) {
        self.tree.clear();
    }
}
