// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Basic usage of Understory R-tree: load, move, remove, and query.

use core::ops::ControlFlow;

use understory_rtree::{Aabb2D, RTreeI64};

fn main() {
    let mut tree = RTreeI64::<u32>::new();
    tree.load((0..64_u32).map(|i| {
        let x = i64::from(i % 8) * 20;
        let y = i64::from(i / 8) * 20;
        (Aabb2D::<i64>::from_xywh(x, y, 10, 10), i)
    }));
    println!("{tree:?}");

    // Move box 0 far away
    tree.update(Aabb2D::new(500, 500, 510, 510), 0).unwrap();
    println!("extent after move: {:?}", tree.extent());

    let hits = tree.in_extent(&Aabb2D::new(0, 0, 45, 45));
    println!("hits in [0,0,45,45]: {hits:?}");

    let first_odd = tree.for_each(|p| {
        if p % 2 == 1 {
            ControlFlow::Break(p)
        } else {
            ControlFlow::Continue(())
        }
    });
    println!("first odd payload: {first_odd:?}");

    let removed = tree.remove(&0);
    println!("removed 0: {removed:?}, remaining {}", tree.len());
}
