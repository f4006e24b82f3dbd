// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vector geometries built on Kurbo primitives, with the exact tests the
//! store layers on top of its bounding-box index.

use alloc::vec::Vec;
use kurbo::{BezPath, Circle, Line, ParamCurve, ParamCurveNearest, Point, Shape, Vec2};

use crate::Extent;

/// Squared distance under which a point counts as lying on a segment.
const ON_SEGMENT_EPSILON_SQ: f64 = 1e-18;

/// Accuracy passed to Kurbo's nearest-point search (exact for lines).
const NEAREST_ACCURACY: f64 = 1e-9;

/// Geometry of a feature.
///
/// Rings and line strings are open vertex lists; a polygon ring is implicitly
/// closed back to its first vertex.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    /// A single position.
    Point(Point),
    /// Several unconnected positions.
    MultiPoint(Vec<Point>),
    /// A polyline.
    LineString(Vec<Point>),
    /// Several polylines.
    MultiLineString(Vec<Vec<Point>>),
    /// Exterior ring followed by hole rings.
    Polygon(Vec<Vec<Point>>),
    /// A filled disc.
    Circle(Circle),
}

/// Nearest point of a geometry to some query position.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClosestPoint {
    /// The nearest point on the geometry.
    pub point: Point,
    /// Squared distance from the query position to `point`.
    pub distance_squared: f64,
}

impl Geometry {
    /// Bounding box of the geometry.
    ///
    /// Geometries without vertices yield the inverted [`Extent::EMPTY`], which
    /// intersects nothing.
    pub fn extent(&self) -> Extent {
        match self {
            Self::Point(p) => Extent::from_point(p.x, p.y),
            Self::MultiPoint(points) | Self::LineString(points) => points_extent(points),
            Self::MultiLineString(parts) | Self::Polygon(parts) => parts
                .iter()
                .map(|part| points_extent(part))
                .fold(Extent::EMPTY, |acc, e| acc.union(&e)),
            Self::Circle(c) => Extent::around(c.center.x, c.center.y, c.radius),
        }
    }

    /// Whether the geometry covers `p`.
    ///
    /// Polygons and circles test containment of their interior (holes
    /// excluded, non-zero winding); points test coincidence; lines test
    /// whether `p` lies on a segment.
    pub fn intersects_coordinate(&self, p: Point) -> bool {
        if !self.extent().contains_point(p.x, p.y) {
            return false;
        }
        match self {
            Self::Point(q) => *q == p,
            Self::MultiPoint(points) => points.contains(&p),
            Self::LineString(points) => on_polyline(points, p),
            Self::MultiLineString(parts) => parts.iter().any(|part| on_polyline(part, p)),
            Self::Polygon(rings) => polygon_contains(rings, p),
            Self::Circle(c) => c.contains(p),
        }
    }

    /// Whether the geometry shares at least one point with `extent`.
    pub fn intersects_extent(&self, extent: &Extent) -> bool {
        if !self.extent().intersects(extent) {
            return false;
        }
        match self {
            Self::Point(p) => extent.contains_point(p.x, p.y),
            Self::MultiPoint(points) => points.iter().any(|p| extent.contains_point(p.x, p.y)),
            Self::LineString(points) => polyline_intersects_extent(points, extent),
            Self::MultiLineString(parts) => parts
                .iter()
                .any(|part| polyline_intersects_extent(part, extent)),
            Self::Polygon(rings) => {
                rings.iter().any(|ring| ring_intersects_extent(ring, extent))
                    || (extent.min_x.is_finite()
                        && extent.min_y.is_finite()
                        && polygon_contains(rings, Point::new(extent.min_x, extent.min_y)))
            }
            Self::Circle(c) => {
                let nx = c.center.x.clamp(extent.min_x, extent.max_x);
                let ny = c.center.y.clamp(extent.min_y, extent.max_y);
                (Point::new(nx, ny) - c.center).hypot2() <= c.radius * c.radius
            }
        }
    }

    /// The point of this geometry nearest to `p`.
    ///
    /// Polygons and circles measure to their boundary. Returns `None` for
    /// geometries without vertices.
    pub fn closest_point(&self, p: Point) -> Option<ClosestPoint> {
        match self {
            Self::Point(q) => Some(closest(*q, p)),
            Self::MultiPoint(points) => nearest_of(points.iter().map(|q| closest(*q, p))),
            Self::LineString(points) => polyline_closest(points, p, false),
            Self::MultiLineString(parts) => {
                nearest_of(parts.iter().filter_map(|part| polyline_closest(part, p, false)))
            }
            Self::Polygon(rings) => {
                nearest_of(rings.iter().filter_map(|ring| polyline_closest(ring, p, true)))
            }
            Self::Circle(c) => {
                let d = p - c.center;
                let len = d.hypot();
                let dir = if len > 0.0 { d / len } else { Vec2::new(1.0, 0.0) };
                Some(closest(c.center + dir * c.radius, p))
            }
        }
    }

    /// Move every vertex by `delta`.
    pub fn translate(&mut self, delta: Vec2) {
        match self {
            Self::Point(p) => *p += delta,
            Self::MultiPoint(points) | Self::LineString(points) => {
                points.iter_mut().for_each(|p| *p += delta);
            }
            Self::MultiLineString(parts) | Self::Polygon(parts) => {
                parts
                    .iter_mut()
                    .flat_map(|part| part.iter_mut())
                    .for_each(|p| *p += delta);
            }
            Self::Circle(c) => c.center += delta,
        }
    }
}

fn points_extent(points: &[Point]) -> Extent {
    points
        .iter()
        .fold(Extent::EMPTY, |acc, p| acc.union(&Extent::from_point(p.x, p.y)))
}

fn closest(q: Point, p: Point) -> ClosestPoint {
    ClosestPoint {
        point: q,
        distance_squared: (q - p).hypot2(),
    }
}

fn nearest_of(candidates: impl Iterator<Item = ClosestPoint>) -> Option<ClosestPoint> {
    candidates.fold(None, |best: Option<ClosestPoint>, c| match best {
        Some(b) if b.distance_squared <= c.distance_squared => Some(b),
        _ => Some(c),
    })
}

/// Segments of an open polyline, or of a ring when `closed`.
fn segments(points: &[Point], closed: bool) -> impl Iterator<Item = Line> + '_ {
    let closing = match (closed, points.first(), points.last()) {
        (true, Some(first), Some(last)) if points.len() > 2 && first != last => {
            Some(Line::new(*last, *first))
        }
        _ => None,
    };
    points
        .windows(2)
        .map(|w| Line::new(w[0], w[1]))
        .chain(closing)
}

fn polyline_closest(points: &[Point], p: Point, closed: bool) -> Option<ClosestPoint> {
    if let [only] = points {
        return Some(closest(*only, p));
    }
    nearest_of(segments(points, closed).map(|seg| {
        let hit = seg.nearest(p, NEAREST_ACCURACY);
        closest(seg.eval(hit.t), p)
    }))
}

fn on_polyline(points: &[Point], p: Point) -> bool {
    polyline_closest(points, p, false)
        .is_some_and(|c| c.distance_squared <= ON_SEGMENT_EPSILON_SQ)
}

fn ring_path(ring: &[Point]) -> BezPath {
    let mut path = BezPath::new();
    if let Some((first, rest)) = ring.split_first() {
        path.move_to(*first);
        for p in rest {
            path.line_to(*p);
        }
        path.close_path();
    }
    path
}

fn polygon_contains(rings: &[Vec<Point>], p: Point) -> bool {
    let Some((exterior, holes)) = rings.split_first() else {
        return false;
    };
    ring_path(exterior).contains(p) && !holes.iter().any(|hole| ring_path(hole).contains(p))
}

fn polyline_intersects_extent(points: &[Point], extent: &Extent) -> bool {
    match points {
        [] => false,
        [only] => extent.contains_point(only.x, only.y),
        _ => segments(points, false).any(|seg| segment_intersects_extent(seg, extent)),
    }
}

fn ring_intersects_extent(ring: &[Point], extent: &Extent) -> bool {
    match ring {
        [] => false,
        [only] => extent.contains_point(only.x, only.y),
        _ => segments(ring, true).any(|seg| segment_intersects_extent(seg, extent)),
    }
}

/// Liang-Barsky clip of a segment against a closed box.
fn segment_intersects_extent(seg: Line, extent: &Extent) -> bool {
    let (a, b) = (seg.p0, seg.p1);
    if extent.contains_point(a.x, a.y) || extent.contains_point(b.x, b.y) {
        return true;
    }
    let d = b - a;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [
        (-d.x, a.x - extent.min_x),
        (d.x, extent.max_x - a.x),
        (-d.y, a.y - extent.min_y),
        (d.y, extent.max_y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return false;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return false;
                }
                t1 = t1.min(r);
            }
        }
    }
    t0 <= t1
}
