// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_rtree --heading-base-level=0

//! Understory R-tree: a payload-keyed 2D R-tree.
//!
//! Entries are `(bounding box, payload)` pairs, addressed by their payload.
//!
//! - Insert one entry at a time, or bulk [`RTree::load`] a batch that is packed
//!   STR-style and grafted into the existing tree.
//! - [`RTree::update`] moves an entry; moves that stay inside the entry's leaf
//!   are done in place.
//! - [`RTree::remove`] condenses underfull nodes and reuses freed arena slots.
//! - Walk everything or an extent with early exit via [`core::ops::ControlFlow`],
//!   or drive a branch-and-bound search with [`RTree::for_each_in_bound`].
//!
//! It is generic over the scalar type `T` and does not depend on any geometry crate.
//! Split metrics use widened accumulator types (f32→f64, f64→f64, i64→i128).
//!
//! # Example
//!
//! ```rust
//! use core::ops::ControlFlow;
//! use understory_rtree::{Aabb2D, RTree};
//!
//! let mut tree: RTree<f64, u32> = RTree::new();
//! tree.insert(Aabb2D::new(0.0, 0.0, 10.0, 10.0), 1);
//! tree.load([
//!     (Aabb2D::new(5.0, 5.0, 15.0, 15.0), 2),
//!     (Aabb2D::new(40.0, 40.0, 50.0, 50.0), 3),
//! ]);
//!
//! let mut hits = tree.in_extent(&Aabb2D::new(6.0, 6.0, 7.0, 7.0));
//! hits.sort_unstable();
//! assert_eq!(hits, vec![1, 2]);
//!
//! // Stop at the first hit.
//! let first = tree.for_each_in_extent(&Aabb2D::new(41.0, 41.0, 42.0, 42.0), |p| {
//!     ControlFlow::Break(p)
//! });
//! assert_eq!(first, Some(3));
//!
//! tree.update(Aabb2D::new(100.0, 0.0, 110.0, 10.0), 1).unwrap();
//! assert_eq!(tree.extent(), Some(Aabb2D::new(5.0, 0.0, 110.0, 50.0)));
//! assert!(tree.remove(&1).is_ok());
//! assert_eq!(tree.len(), 2);
//! ```
//!
//! ### Float semantics
//!
//! This crate assumes no NaNs for floating-point coordinates. Infinite
//! coordinates are fine, and inverted boxes (see `Aabb2D::EMPTY`) are stored
//! but never match a query.

#![no_std]

extern crate alloc;

pub mod error;
pub mod rtree;
pub mod types;

pub use error::RTreeError;
pub use rtree::{DEFAULT_MAX_CHILDREN, RTree, RTreeF32, RTreeF64, RTreeI64};
pub use types::Aabb2D;
