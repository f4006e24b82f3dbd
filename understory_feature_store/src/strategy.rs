// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Loading strategies: how a requested view extent is split into fetch units.
//!
//! The store asks its strategy for the extents to fetch, then skips every
//! extent already covered by a previous fetch. Strategies that return stable,
//! repeatable extents (a single infinite extent, or grid tiles) let that check
//! deduplicate fetches; [`Strategy::Bbox`] only avoids refetching views that
//! fall entirely inside an earlier one.

use alloc::vec::Vec;

use crate::Extent;

/// Splits a requested extent into the extents to fetch.
pub trait LoadingStrategy {
    /// Extents to fetch for a view of `extent` at `resolution` (map units per pixel).
    fn extents(&self, extent: &Extent, resolution: f64) -> Vec<Extent>;
}

impl<F> LoadingStrategy for F
where
    F: Fn(&Extent, f64) -> Vec<Extent>,
{
    fn extents(&self, extent: &Extent, resolution: f64) -> Vec<Extent> {
        self(extent, resolution)
    }
}

/// The built-in strategies.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Strategy {
    /// Load everything once: always the infinite extent.
    #[default]
    All,
    /// Load exactly the requested extent.
    Bbox,
    /// Load the grid tiles covering the request at the tier nearest to the
    /// resolution.
    Tile(TileGrid),
}

impl LoadingStrategy for Strategy {
    fn extents(&self, extent: &Extent, resolution: f64) -> Vec<Extent> {
        match self {
            Self::All => alloc::vec![Extent::EVERYTHING],
            Self::Bbox => alloc::vec![*extent],
            Self::Tile(grid) => {
                let z = grid.z_for_resolution(resolution);
                grid.tile_range(extent, z)
                    .map(|range| range.coords().map(|c| grid.tile_extent(c)).collect())
                    .unwrap_or_default()
            }
        }
    }
}

/// Address of a tile: zoom level and column/row counted from the grid origin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    /// Zoom level (index into the grid's resolutions).
    pub z: usize,
    /// Column, growing with x.
    pub x: i64,
    /// Row, growing with y.
    pub y: i64,
}

/// Inclusive range of tiles at one zoom level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level.
    pub z: usize,
    /// First column.
    pub min_x: i64,
    /// First row.
    pub min_y: i64,
    /// Last column.
    pub max_x: i64,
    /// Last row.
    pub max_y: i64,
}

impl TileRange {
    /// Every tile in the range, row by row.
    pub fn coords(self) -> impl Iterator<Item = TileCoord> {
        (self.min_y..=self.max_y).flat_map(move |y| {
            (self.min_x..=self.max_x).map(move |x| TileCoord { z: self.z, x, y })
        })
    }

    /// Number of tiles in the range.
    pub fn len(&self) -> usize {
        let w = usize::try_from(self.max_x - self.min_x + 1).unwrap_or(0);
        let h = usize::try_from(self.max_y - self.min_y + 1).unwrap_or(0);
        w * h
    }

    /// True if the range holds no tile.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Square tiles over a finite extent, with one resolution per zoom level.
///
/// Tiles are counted from the minimum corner of the grid extent.
#[derive(Clone, Debug, PartialEq)]
pub struct TileGrid {
    extent: Extent,
    resolutions: Vec<f64>,
    tile_size: f64,
}

impl TileGrid {
    /// Grid over `extent` with explicit `resolutions` (map units per pixel) and
    /// `tile_size` in pixels.
    ///
    /// Resolutions are sorted from coarsest to finest. An empty list gets the
    /// single resolution at which one tile covers the extent.
    pub fn new(extent: Extent, mut resolutions: Vec<f64>, tile_size: f64) -> Self {
        resolutions.sort_by(|a, b| b.partial_cmp(a).unwrap_or(core::cmp::Ordering::Equal));
        if resolutions.is_empty() {
            resolutions.push(extent.width().max(extent.height()) / tile_size);
        }
        Self {
            extent,
            resolutions,
            tile_size,
        }
    }

    /// Grid over `extent` where zoom 0 is a single tile and each further level
    /// halves the resolution, up to `max_zoom`.
    pub fn for_extent(extent: Extent, max_zoom: usize, tile_size: f64) -> Self {
        let mut resolutions = Vec::with_capacity(max_zoom + 1);
        let mut r = extent.width().max(extent.height()) / tile_size;
        for _ in 0..=max_zoom {
            resolutions.push(r);
            r /= 2.0;
        }
        Self::new(extent, resolutions, tile_size)
    }

    /// The grid extent.
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Tile size in pixels.
    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Resolution of zoom level `z`.
    pub fn resolution(&self, z: usize) -> Option<f64> {
        self.resolutions.get(z).copied()
    }

    /// Zoom level whose resolution is nearest to `resolution`.
    pub fn z_for_resolution(&self, resolution: f64) -> usize {
        let mut best = 0;
        let mut best_diff = f64::INFINITY;
        for (z, r) in self.resolutions.iter().enumerate() {
            let diff = if *r > resolution {
                r - resolution
            } else {
                resolution - r
            };
            if diff < best_diff {
                best = z;
                best_diff = diff;
            }
        }
        best
    }

    fn tile_span(&self, z: usize) -> Option<f64> {
        self.resolution(z).map(|r| r * self.tile_size)
    }

    /// Tiles at level `z` intersecting `extent`, clamped to the grid.
    ///
    /// Returns `None` when `extent` misses the grid or `z` is out of range.
    pub fn tile_range(&self, extent: &Extent, z: usize) -> Option<TileRange> {
        let span = self.tile_span(z)?;
        if span.is_nan() || span <= 0.0 {
            return None;
        }
        let clipped = extent.intersect(&self.extent);
        if clipped.is_empty() {
            return None;
        }
        let cols = ceil_i64(self.extent.width() / span).max(1);
        let rows = ceil_i64(self.extent.height() / span).max(1);
        let min_x = floor_i64((clipped.min_x - self.extent.min_x) / span).clamp(0, cols - 1);
        let min_y = floor_i64((clipped.min_y - self.extent.min_y) / span).clamp(0, rows - 1);
        let max_x = (ceil_i64((clipped.max_x - self.extent.min_x) / span) - 1).clamp(min_x, cols - 1);
        let max_y = (ceil_i64((clipped.max_y - self.extent.min_y) / span) - 1).clamp(min_y, rows - 1);
        Some(TileRange {
            z,
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Extent covered by `tile`.
    pub fn tile_extent(&self, tile: TileCoord) -> Extent {
        let span = self.tile_span(tile.z).unwrap_or(0.0);
        let x0 = self.extent.min_x + tile.x as f64 * span;
        let y0 = self.extent.min_y + tile.y as f64 * span;
        Extent::new(x0, y0, x0 + span, y0 + span)
    }
}

#[allow(clippy::cast_possible_truncation, reason = "tile indices are far below i64::MAX")]
fn floor_i64(v: f64) -> i64 {
    let t = v as i64;
    if (t as f64) > v { t - 1 } else { t }
}

#[allow(clippy::cast_possible_truncation, reason = "tile indices are far below i64::MAX")]
fn ceil_i64(v: f64) -> i64 {
    let t = v as i64;
    if (t as f64) < v { t + 1 } else { t }
}
