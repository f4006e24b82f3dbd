// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! R-tree keyed by payload, generic over scalar `T: Scalar`, with SAH-like splits.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;
use core::ops::ControlFlow;

use crate::error::RTreeError;
use crate::types::{Aabb2D, Scalar, ScalarAcc, area, union_aabb};

/// Default maximum fan-out of a node.
pub const DEFAULT_MAX_CHILDREN: usize = 9;

/// Mutable R-tree over `(bounding box, payload)` entries.
///
/// Entries are addressed by their payload, which must be unique within a tree.
/// The tree never looks at what a payload refers to: when the geometry behind
/// a payload changes, call [`RTree::update`] with the new box, otherwise
/// queries keep answering against the stale box.
///
/// Internally nodes live in an arena and are recycled through a free list, so
/// long-running insert/remove workloads do not grow memory without bound.
#[derive(Clone)]
pub struct RTree<T: Scalar, P: Copy + Ord + Debug> {
    max_children: usize,
    min_children: usize,
    root: Option<NodeIdx>,
    arena: Vec<RNode<T>>,
    free_nodes: Vec<NodeIdx>,
    slots: Vec<Option<Slot<T, P>>>,
    free_slots: Vec<usize>,
    by_payload: BTreeMap<P, usize>,
}

#[derive(Copy, Clone, Debug)]
struct Slot<T, P> {
    bbox: Aabb2D<T>,
    payload: P,
}

#[derive(Clone, Debug)]
struct RNode<T> {
    bbox: Aabb2D<T>,
    /// Leaves have height 1.
    height: u32,
    children: Vec<RChild<T>>,
}

impl<T> RNode<T> {
    fn is_leaf(&self) -> bool {
        self.height == 1
    }
}

#[derive(Copy, Clone, Debug)]
enum RChild<T> {
    Node(NodeIdx),
    Item { slot: usize, bbox: Aabb2D<T> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct NodeIdx(usize);

impl NodeIdx {
    const fn new(i: usize) -> Self {
        Self(i)
    }

    const fn get(self) -> usize {
        self.0
    }
}

// Result of a node split: (left children, left bbox, right children, right bbox).
type RSplit<TS> = (Vec<RChild<TS>>, Aabb2D<TS>, Vec<RChild<TS>>, Aabb2D<TS>);
type RBoxed<TS> = Vec<(RChild<TS>, Aabb2D<TS>)>;

impl<T: Scalar, P: Copy + Ord + Debug> Default for RTree<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, P: Copy + Ord + Debug> RTree<T, P> {
    /// Create an empty tree with [`DEFAULT_MAX_CHILDREN`] fan-out.
    pub fn new() -> Self {
        Self::with_max_children(DEFAULT_MAX_CHILDREN)
    }

    /// Create an empty tree with the given maximum node fan-out (at least 2).
    ///
    /// The minimum fill is 40% of the maximum, clamped so that an overflowing
    /// node can always be split into two legal halves.
    pub fn with_max_children(max_children: usize) -> Self {
        let max_children = max_children.max(2);
        let min_children = (max_children * 2)
            .div_ceil(5)
            .clamp(1, max_children.div_ceil(2));
        Self {
            max_children,
            min_children,
            root: None,
            arena: Vec::new(),
            free_nodes: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            by_payload: BTreeMap::new(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_payload.len()
    }

    /// True if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_payload.is_empty()
    }

    /// Height of the tree; 0 when empty, 1 when the root is a leaf.
    pub fn height(&self) -> usize {
        self.root
            .map(|r| self.arena[r.get()].height as usize)
            .unwrap_or(0)
    }

    /// Whether `payload` is indexed.
    pub fn contains(&self, payload: &P) -> bool {
        self.by_payload.contains_key(payload)
    }

    /// The box currently recorded for `payload`.
    pub fn bbox_of(&self, payload: &P) -> Option<Aabb2D<T>> {
        let slot = *self.by_payload.get(payload)?;
        self.slots.get(slot)?.as_ref().map(|s| s.bbox)
    }

    /// Insert an entry.
    ///
    /// Inserting a payload that is already present moves it to `bbox`.
    pub fn insert(&mut self, bbox: Aabb2D<T>, payload: P) {
        if self.by_payload.contains_key(&payload) {
            let _ = self.update(bbox, payload);
            return;
        }
        let slot = self.alloc_slot(bbox, payload);
        self.by_payload.insert(payload, slot);
        self.insert_item(slot, bbox);
    }

    /// Bulk insert.
    ///
    /// New entries are packed into a subtree with an STR-like pass and grafted
    /// into the existing tree at the matching level, instead of being inserted
    /// one at a time. Payloads that are already present are moved; a payload
    /// repeated within `entries` keeps its last box.
    pub fn load<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (Aabb2D<T>, P)>,
    {
        let mut fresh: Vec<(usize, Aabb2D<T>)> = Vec::new();
        let mut pending: BTreeMap<usize, usize> = BTreeMap::new();
        for (bbox, payload) in entries {
            match self.by_payload.get(&payload).copied() {
                None => {
                    let slot = self.alloc_slot(bbox, payload);
                    self.by_payload.insert(payload, slot);
                    pending.insert(slot, fresh.len());
                    fresh.push((slot, bbox));
                }
                Some(slot) => match pending.get(&slot) {
                    Some(&i) => {
                        fresh[i].1 = bbox;
                        if let Some(entry) = self.slots[slot].as_mut() {
                            entry.bbox = bbox;
                        }
                    }
                    None => {
                        let _ = self.update(bbox, payload);
                    }
                },
            }
        }

        // Too few to form a leaf of their own.
        if fresh.len() < self.min_children {
            for (slot, bbox) in fresh {
                self.insert_item(slot, bbox);
            }
            return;
        }
        if let Some(subtree) = self.bulk_build(&mut fresh) {
            self.graft(subtree);
        }
    }

    /// Remove the entry for `payload`, returning the box it was indexed under.
    pub fn remove(&mut self, payload: &P) -> Result<Aabb2D<T>, RTreeError> {
        let slot = self.by_payload.remove(payload).ok_or(RTreeError::NotFound)?;
        let Some(entry) = self.slots.get_mut(slot).and_then(Option::take) else {
            return Err(RTreeError::NotFound);
        };
        self.free_slots.push(slot);
        self.detach(slot, &entry.bbox);
        Ok(entry.bbox)
    }

    /// Move the entry for `payload` to `bbox`.
    ///
    /// A move that stays inside the entry's current leaf is done in place;
    /// otherwise the entry is detached and re-inserted.
    pub fn update(&mut self, bbox: Aabb2D<T>, payload: P) -> Result<(), RTreeError> {
        let slot = *self.by_payload.get(&payload).ok_or(RTreeError::NotFound)?;
        let Some(entry) = self.slots.get_mut(slot).and_then(Option::as_mut) else {
            return Err(RTreeError::NotFound);
        };
        let old = entry.bbox;
        if old == bbox {
            return Ok(());
        }
        entry.bbox = bbox;

        if let Some(root) = self.root {
            let mut path = Vec::new();
            if self.find_leaf_path(root, slot, &old, !old.is_empty(), &mut path)
                && let Some(&leaf) = path.last()
            {
                if self.arena[leaf.get()].bbox.contains(&bbox) {
                    for c in &mut self.arena[leaf.get()].children {
                        if let RChild::Item { slot: s, bbox: b } = c
                            && *s == slot
                        {
                            *b = bbox;
                        }
                    }
                    for &node in path.iter().rev() {
                        self.refresh_bbox(node);
                    }
                    return Ok(());
                }
                self.take_item(&path, slot);
            }
        }
        self.insert_item(slot, bbox);
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.root = None;
        self.arena.clear();
        self.free_nodes.clear();
        self.slots.clear();
        self.free_slots.clear();
        self.by_payload.clear();
    }

    /// Visit every payload in unspecified order.
    ///
    /// Returning [`ControlFlow::Break`] stops the walk and the break value is
    /// handed back to the caller.
    pub fn for_each<B>(&self, mut f: impl FnMut(P) -> ControlFlow<B>) -> Option<B> {
        for entry in self.slots.iter().flatten() {
            if let ControlFlow::Break(b) = f(entry.payload) {
                return Some(b);
            }
        }
        None
    }

    /// Visit the payloads whose box intersects `extent`, with the same early
    /// exit contract as [`RTree::for_each`].
    ///
    /// Boxes fully disjoint from `extent` are never visited. A visited box may
    /// only intersect the extent; precise geometry tests are up to the caller.
    pub fn for_each_in_extent<B>(
        &self,
        extent: &Aabb2D<T>,
        mut f: impl FnMut(P) -> ControlFlow<B>,
    ) -> Option<B> {
        let mut bound = *extent;
        self.for_each_in_bound(&mut bound, |_, payload| f(payload))
    }

    /// Range traversal against a bound the callback may tighten while the walk
    /// is in progress.
    ///
    /// The bound is re-read before every node and entry test, so narrowing it
    /// prunes the remainder of the walk. This is the primitive behind
    /// branch-and-bound nearest searches.
    ///
    /// Precondition: the callback may only replace the bound with a box
    /// contained in the current one. Subtrees already rejected are never
    /// revisited, so growing the bound would silently miss entries.
    pub fn for_each_in_bound<B>(
        &self,
        bound: &mut Aabb2D<T>,
        mut f: impl FnMut(&mut Aabb2D<T>, P) -> ControlFlow<B>,
    ) -> Option<B> {
        let root = self.root?;
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            let n = &self.arena[i.get()];
            if !n.bbox.intersects(bound) {
                continue;
            }
            for c in &n.children {
                match *c {
                    RChild::Node(ci) => stack.push(ci),
                    RChild::Item { slot, bbox } => {
                        if !bbox.intersects(bound) {
                            continue;
                        }
                        let Some(entry) = self.slots.get(slot).and_then(Option::as_ref) else {
                            continue;
                        };
                        let before = *bound;
                        if let ControlFlow::Break(b) = f(bound, entry.payload) {
                            return Some(b);
                        }
                        debug_assert!(
                            before.contains(bound) || before == *bound,
                            "search bound may only shrink during traversal"
                        );
                    }
                }
            }
        }
        None
    }

    /// All payloads, in unspecified order.
    pub fn all(&self) -> Vec<P> {
        self.slots.iter().flatten().map(|e| e.payload).collect()
    }

    /// Payloads whose box intersects `extent`, in unspecified order.
    pub fn in_extent(&self, extent: &Aabb2D<T>) -> Vec<P> {
        let mut out = Vec::new();
        self.for_each_in_extent(extent, |p| {
            out.push(p);
            ControlFlow::<()>::Continue(())
        });
        out
    }

    /// The box covering every entry, or `None` when the tree is empty.
    pub fn extent(&self) -> Option<Aabb2D<T>> {
        self.root.map(|r| self.arena[r.get()].bbox)
    }

    // --- internals ---

    fn alloc_slot(&mut self, bbox: Aabb2D<T>, payload: P) -> usize {
        let entry = Some(Slot { bbox, payload });
        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot] = entry;
            slot
        } else {
            self.slots.push(entry);
            self.slots.len() - 1
        }
    }

    fn alloc_node(&mut self, height: u32, bbox: Aabb2D<T>, children: Vec<RChild<T>>) -> NodeIdx {
        let node = RNode {
            bbox,
            height,
            children,
        };
        if let Some(idx) = self.free_nodes.pop() {
            self.arena[idx.get()] = node;
            idx
        } else {
            self.arena.push(node);
            NodeIdx::new(self.arena.len() - 1)
        }
    }

    fn free_node(&mut self, node: NodeIdx) {
        self.arena[node.get()].children.clear();
        self.free_nodes.push(node);
    }

    fn child_bbox(arena: &[RNode<T>], c: &RChild<T>) -> Aabb2D<T> {
        match c {
            RChild::Node(i) => arena[i.get()].bbox,
            RChild::Item { bbox, .. } => *bbox,
        }
    }

    fn union_of(arena: &[RNode<T>], children: &[RChild<T>]) -> Option<Aabb2D<T>> {
        let mut it = children.iter().map(|c| Self::child_bbox(arena, c));
        let first = it.next()?;
        Some(it.fold(first, union_aabb))
    }

    fn refresh_bbox(&mut self, node: NodeIdx) {
        if let Some(bbox) = Self::union_of(&self.arena, &self.arena[node.get()].children) {
            self.arena[node.get()].bbox = bbox;
        }
    }

    fn centroid_x_of_aabb(a: &Aabb2D<T>) -> T {
        Scalar::mid(a.min_x, a.max_x)
    }

    fn centroid_y_of_aabb(a: &Aabb2D<T>) -> T {
        Scalar::mid(a.min_y, a.max_y)
    }

    fn cmp_scalar(a: T, b: T) -> core::cmp::Ordering {
        T::total_cmp(a, b)
    }

    fn grid_side(n: usize) -> usize {
        let mut gx = 1_usize;
        while gx * gx < n {
            gx += 1;
        }
        gx
    }

    /// STR-like bulk builder: packs `items` into a fresh subtree in `arena`
    /// and returns its root.
    fn bulk_build(&mut self, items: &mut [(usize, Aabb2D<T>)]) -> Option<NodeIdx> {
        if items.is_empty() {
            return None;
        }
        let max_children = self.max_children;

        // Leaf level: vertical slices by x, then runs by y within each slice.
        let n = items.len();
        let gx = Self::grid_side(n.div_ceil(max_children));
        items.sort_by(|a, b| {
            Self::cmp_scalar(Self::centroid_x_of_aabb(&a.1), Self::centroid_x_of_aabb(&b.1))
        });
        let slice_size = n.div_ceil(gx);
        let mut level: Vec<NodeIdx> = Vec::new();
        for slice in items.chunks_mut(slice_size) {
            slice.sort_by(|a, b| {
                Self::cmp_scalar(Self::centroid_y_of_aabb(&a.1), Self::centroid_y_of_aabb(&b.1))
            });
            for chunk in slice.chunks(max_children) {
                let children: Vec<RChild<T>> = chunk
                    .iter()
                    .map(|&(slot, bbox)| RChild::Item { slot, bbox })
                    .collect();
                let Some(bbox) = Self::union_of(&self.arena, &children) else {
                    continue;
                };
                level.push(self.alloc_node(1, bbox, children));
            }
        }

        // Promote until a single root remains
        let mut height = 1_u32;
        while level.len() > max_children {
            height += 1;
            let n_nodes = level.len();
            let gx = Self::grid_side(n_nodes.div_ceil(max_children));
            level.sort_by(|&a, &b| {
                Self::cmp_scalar(
                    Self::centroid_x_of_aabb(&self.arena[a.get()].bbox),
                    Self::centroid_x_of_aabb(&self.arena[b.get()].bbox),
                )
            });
            let slice_size = n_nodes.div_ceil(gx);
            let mut next: Vec<NodeIdx> = Vec::new();
            for slice in level.chunks_mut(slice_size) {
                slice.sort_by(|&a, &b| {
                    Self::cmp_scalar(
                        Self::centroid_y_of_aabb(&self.arena[a.get()].bbox),
                        Self::centroid_y_of_aabb(&self.arena[b.get()].bbox),
                    )
                });
                for chunk in slice.chunks(max_children) {
                    let children: Vec<RChild<T>> = chunk.iter().map(|&i| RChild::Node(i)).collect();
                    let Some(bbox) = Self::union_of(&self.arena, &children) else {
                        continue;
                    };
                    next.push(self.alloc_node(height, bbox, children));
                }
            }
            level = next;
        }

        if level.len() == 1 {
            return level.first().copied();
        }
        // Pack remaining nodes under a new root
        let children: Vec<RChild<T>> = level.into_iter().map(RChild::Node).collect();
        let bbox = Self::union_of(&self.arena, &children)?;
        Some(self.alloc_node(height + 1, bbox, children))
    }

    /// Merge a detached subtree into the tree at the level matching its height.
    fn graft(&mut self, subtree: NodeIdx) {
        let Some(root) = self.root else {
            self.root = Some(subtree);
            return;
        };
        let sub_height = self.arena[subtree.get()].height;
        let root_height = self.arena[root.get()].height;
        if sub_height == root_height {
            self.grow_root(root, subtree);
        } else if sub_height < root_height {
            let bbox = self.arena[subtree.get()].bbox;
            if let Some(right) =
                self.insert_child(root, RChild::Node(subtree), bbox, sub_height + 1)
            {
                self.grow_root(root, right);
            }
        } else {
            // The new subtree is taller: hang the old tree inside it.
            self.root = Some(subtree);
            let bbox = self.arena[root.get()].bbox;
            if let Some(right) = self.insert_child(subtree, RChild::Node(root), bbox, root_height + 1)
            {
                self.grow_root(subtree, right);
            }
        }
    }

    fn grow_root(&mut self, left: NodeIdx, right: NodeIdx) {
        let height = self.arena[left.get()].height + 1;
        let bbox = union_aabb(self.arena[left.get()].bbox, self.arena[right.get()].bbox);
        let root = self.alloc_node(height, bbox, vec![RChild::Node(left), RChild::Node(right)]);
        self.root = Some(root);
    }

    fn insert_item(&mut self, slot: usize, bbox: Aabb2D<T>) {
        let item = RChild::Item { slot, bbox };
        match self.root {
            None => {
                let leaf = self.alloc_node(1, bbox, vec![item]);
                self.root = Some(leaf);
            }
            Some(root) => {
                if let Some(right) = self.insert_child(root, item, bbox, 1) {
                    self.grow_root(root, right);
                }
            }
        }
    }

    fn enlarge_cost(a: &Aabb2D<T>, b: &Aabb2D<T>) -> T::Acc {
        let u = union_aabb(*a, *b);
        area(&u) - area(a)
    }

    fn choose_child(arena: &[RNode<T>], children: &[RChild<T>], bbox: &Aabb2D<T>) -> usize {
        let mut best_idx = 0_usize;
        let mut best_cost: Option<T::Acc> = None;
        for (i, c) in children.iter().enumerate() {
            let cost = Self::enlarge_cost(&Self::child_bbox(arena, c), bbox);
            if best_cost.map(|bc| cost < bc).unwrap_or(true) {
                best_cost = Some(cost);
                best_idx = i;
            }
        }
        best_idx
    }

    /// Add `child` to the node of height `target_height` below `node` that
    /// needs the least enlargement. Returns the new right sibling of `node`
    /// when `node` itself had to split.
    fn insert_child(
        &mut self,
        node: NodeIdx,
        child: RChild<T>,
        bbox: Aabb2D<T>,
        target_height: u32,
    ) -> Option<NodeIdx> {
        let idx = node.get();
        if self.arena[idx].height == target_height {
            let n = &mut self.arena[idx];
            n.bbox = if n.children.is_empty() {
                bbox
            } else {
                union_aabb(n.bbox, bbox)
            };
            n.children.push(child);
            if n.children.len() <= self.max_children {
                return None;
            }
            return Some(self.split_node(node));
        }

        let pick = Self::choose_child(&self.arena, &self.arena[idx].children, &bbox);
        let next = match self.arena[idx].children[pick] {
            RChild::Node(next) => next,
            RChild::Item { .. } => unreachable!("insertion level lies below the leaves"),
        };
        let split = self.insert_child(next, child, bbox, target_height);
        self.arena[idx].bbox = union_aabb(self.arena[idx].bbox, bbox);
        if let Some(right) = split {
            self.arena[idx]
                .children
                .insert(pick + 1, RChild::Node(right));
            if self.arena[idx].children.len() > self.max_children {
                return Some(self.split_node(node));
            }
        }
        None
    }

    /// Split an overflowing node in two; `node` keeps the left half and the
    /// right half is returned as a new sibling of the same height.
    fn split_node(&mut self, node: NodeIdx) -> NodeIdx {
        let children = core::mem::take(&mut self.arena[node.get()].children);
        let (left, l_bbox, right, r_bbox) =
            Self::split_children(&self.arena, children, self.min_children);
        let height = self.arena[node.get()].height;
        let n = &mut self.arena[node.get()];
        n.children = left;
        n.bbox = l_bbox;
        self.alloc_node(height, r_bbox, right)
    }

    fn prefix_suffix(v: &[(RChild<T>, Aabb2D<T>)]) -> (Vec<Aabb2D<T>>, Vec<Aabb2D<T>>) {
        let mut prefix: Vec<Aabb2D<T>> = Vec::with_capacity(v.len());
        let mut acc = v[0].1;
        for (_, bb) in v {
            acc = union_aabb(acc, *bb);
            prefix.push(acc);
        }
        let mut suffix: Vec<Aabb2D<T>> = Vec::with_capacity(v.len());
        let mut acc = v[v.len() - 1].1;
        for (_, bb) in v.iter().rev() {
            acc = union_aabb(*bb, acc);
            suffix.push(acc);
        }
        suffix.reverse();
        (prefix, suffix)
    }

    /// SAH-like split: sort along an axis, precompute prefix/suffix AABBs, and
    /// choose `k` that minimizes `area(LB_k) * k + area(RB_k) * (n - k)`.
    fn split_children(
        arena: &[RNode<T>],
        children: Vec<RChild<T>>,
        min_children: usize,
    ) -> RSplit<T> {
        let n = children.len();
        let lo = min_children.clamp(1, n / 2);
        let hi = n - lo;

        let boxed: RBoxed<T> = children
            .into_iter()
            .map(|c| {
                let bb = Self::child_bbox(arena, &c);
                (c, bb)
            })
            .collect();
        let mut by_x = boxed.clone();
        by_x.sort_by(|a, b| {
            Self::cmp_scalar(Self::centroid_x_of_aabb(&a.1), Self::centroid_x_of_aabb(&b.1))
        });
        let mut by_y = boxed;
        by_y.sort_by(|a, b| {
            Self::cmp_scalar(Self::centroid_y_of_aabb(&a.1), Self::centroid_y_of_aabb(&b.1))
        });

        let cost = |prefix: &[Aabb2D<T>], suffix: &[Aabb2D<T>], k: usize| -> ScalarAcc<T> {
            area(&prefix[k - 1]) * T::acc_from_usize(k)
                + area(&suffix[k]) * T::acc_from_usize(n - k)
        };

        let (px, sx) = Self::prefix_suffix(&by_x);
        let (py, sy) = Self::prefix_suffix(&by_y);
        let mut best = (cost(&px, &sx, lo), 0_usize, lo);
        for (axis, (prefix, suffix)) in [(&px, &sx), (&py, &sy)].into_iter().enumerate() {
            for k in lo..=hi {
                let c = cost(prefix, suffix, k);
                if c < best.0 {
                    best = (c, axis, k);
                }
            }
        }

        let (_, axis, k) = best;
        let (mut v, prefix, suffix) = if axis == 0 {
            (by_x, px, sx)
        } else {
            (by_y, py, sy)
        };
        let right: Vec<RChild<T>> = v.split_off(k).into_iter().map(|(c, _)| c).collect();
        let left: Vec<RChild<T>> = v.into_iter().map(|(c, _)| c).collect();
        (left, prefix[k - 1], right, suffix[k])
    }

    /// Record the root→leaf path to the leaf holding `slot` in `path`.
    ///
    /// With `prune`, only descends into nodes whose box contains `bbox`; every
    /// ancestor box covers its entries, so that is exact for non-empty boxes.
    fn find_leaf_path(
        &self,
        node: NodeIdx,
        slot: usize,
        bbox: &Aabb2D<T>,
        prune: bool,
        path: &mut Vec<NodeIdx>,
    ) -> bool {
        let n = &self.arena[node.get()];
        if prune && !n.bbox.contains(bbox) {
            return false;
        }
        path.push(node);
        if n.is_leaf() {
            if n
                .children
                .iter()
                .any(|c| matches!(c, RChild::Item { slot: s, .. } if *s == slot))
            {
                return true;
            }
        } else {
            for c in &n.children {
                if let RChild::Node(ci) = c
                    && self.find_leaf_path(*ci, slot, bbox, prune, path)
                {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    fn detach(&mut self, slot: usize, bbox: &Aabb2D<T>) {
        let Some(root) = self.root else {
            return;
        };
        let mut path = Vec::new();
        if self.find_leaf_path(root, slot, bbox, !bbox.is_empty(), &mut path) {
            self.take_item(&path, slot);
        }
    }

    /// Drop `slot` from the leaf at the end of `path`, then condense the path.
    fn take_item(&mut self, path: &[NodeIdx], slot: usize) {
        if let Some(&leaf) = path.last() {
            self.arena[leaf.get()]
                .children
                .retain(|c| !matches!(c, RChild::Item { slot: s, .. } if *s == slot));
        }
        self.condense(path);
    }

    /// Walk `path` bottom-up: underfull non-root nodes are unlinked and their
    /// children re-inserted at their original level, the rest get their boxes
    /// tightened.
    fn condense(&mut self, path: &[NodeIdx]) {
        let mut orphan_nodes: Vec<NodeIdx> = Vec::new();
        let mut orphan_items: Vec<(usize, Aabb2D<T>)> = Vec::new();
        for depth in (1..path.len()).rev() {
            let node = path[depth];
            if self.arena[node.get()].children.len() < self.min_children {
                let parent = path[depth - 1];
                self.arena[parent.get()]
                    .children
                    .retain(|c| !matches!(c, RChild::Node(i) if *i == node));
                for child in core::mem::take(&mut self.arena[node.get()].children) {
                    match child {
                        RChild::Node(i) => orphan_nodes.push(i),
                        RChild::Item { slot, bbox } => orphan_items.push((slot, bbox)),
                    }
                }
                self.free_node(node);
            } else {
                self.refresh_bbox(node);
            }
        }
        if let Some(&root) = path.first() {
            self.refresh_bbox(root);
        }
        self.shorten_root();

        for node in orphan_nodes {
            self.graft(node);
        }
        for (slot, bbox) in orphan_items {
            self.insert_item(slot, bbox);
        }
    }

    /// Drop empty roots and collapse single-child internal roots.
    fn shorten_root(&mut self) {
        while let Some(root) = self.root {
            let (empty, only_child) = {
                let n = &self.arena[root.get()];
                let only_child = match (n.is_leaf(), n.children.as_slice()) {
                    (false, [RChild::Node(only)]) => Some(*only),
                    _ => None,
                };
                (n.children.is_empty(), only_child)
            };
            if empty {
                self.free_node(root);
                self.root = None;
            } else if let Some(only) = only_child {
                self.free_node(root);
                self.root = Some(only);
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
impl<T: Scalar, P: Copy + Ord + Debug> RTree<T, P> {
    /// Panics if any structural invariant is broken.
    pub(crate) fn check_invariants(&self) {
        let mut seen = 0_usize;
        if let Some(root) = self.root {
            self.check_node(root, true, &mut seen);
        }
        assert_eq!(seen, self.len(), "every entry is reachable exactly once");
        assert_eq!(
            self.slots.iter().flatten().count(),
            self.by_payload.len(),
            "slot table matches payload map"
        );
    }

    fn check_node(&self, node: NodeIdx, is_root: bool, seen: &mut usize) {
        let n = &self.arena[node.get()];
        assert!(!n.children.is_empty(), "live nodes are never empty");
        assert!(n.children.len() <= self.max_children, "node overflow");
        if is_root && !n.is_leaf() {
            assert!(n.children.len() >= 2, "internal roots branch");
        }
        for c in &n.children {
            let cb = Self::child_bbox(&self.arena, c);
            assert!(
                cb.is_empty() || n.bbox.contains(&cb),
                "node box must cover its children"
            );
            match c {
                RChild::Node(ci) => {
                    assert!(!n.is_leaf(), "leaves only hold entries");
                    assert_eq!(self.arena[ci.get()].height + 1, n.height, "uniform depth");
                    self.check_node(*ci, false, seen);
                }
                RChild::Item { slot, bbox } => {
                    assert!(n.is_leaf(), "entries only live in leaves");
                    let entry = self.slots[*slot].as_ref().expect("live slot");
                    assert_eq!(entry.bbox, *bbox, "leaf box matches slot box");
                    *seen += 1;
                }
            }
        }
    }
}

impl<T: Scalar, P: Copy + Ord + Debug> Debug for RTree<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RTree")
            .field("max_children", &self.max_children)
            .field("min_children", &self.min_children)
            .field("arena_nodes", &self.arena.len())
            .field("free_nodes", &self.free_nodes.len())
            .field("entries", &self.len())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// R-tree with i64 coordinates and i128 metrics.
pub type RTreeI64<P> = RTree<i64, P>;

/// R-tree with f32 coordinates and f64 metrics.
pub type RTreeF32<P> = RTree<f32, P>;

/// R-tree with f64 coordinates and f64 metrics.
pub type RTreeF64<P> = RTree<f64, P>;
