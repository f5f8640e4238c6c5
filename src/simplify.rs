//! Douglas-Peucker simplification of tract outlines.
//!
//! A polygon is only replaced when its simplified form is still a valid
//! polygon: every ring keeps at least three distinct vertices and no two
//! segments cross. Otherwise the original polygon is kept as is.

use crate::types::JoinedTract;
use geo::{Area, CoordsIter, Intersects, Line, LineString, MultiPolygon, Polygon, Simplify};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimplifyStats {
    pub polygons: usize,
    /// Polygons kept unsimplified because the result would be degenerate or
    /// would cross another part of the same tract.
    pub fallbacks: usize,
    pub vertices_before: usize,
    pub vertices_after: usize,
}

impl AddAssign for SimplifyStats {
    fn add_assign(&mut self, other: Self) {
        self.polygons += other.polygons;
        self.fallbacks += other.fallbacks;
        self.vertices_before += other.vertices_before;
        self.vertices_after += other.vertices_after;
    }
}

// Segment wrapper for the crossing check
struct Segment {
    ring: usize,
    index: usize,
    line: Line<f64>,
}

impl RTreeObject for Segment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.line.start.x, self.line.start.y],
            [self.line.end.x, self.line.end.y],
        )
    }
}

fn distinct_vertices(ring: &LineString<f64>) -> usize {
    let n = ring.0.len();
    if n > 1 && ring.is_closed() {
        n - 1
    } else {
        n
    }
}

fn has_crossings(rings: &[&LineString<f64>]) -> bool {
    let segments: Vec<Segment> = rings
        .iter()
        .enumerate()
        .flat_map(|(r, ring)| {
            ring.lines()
                .enumerate()
                .map(move |(i, line)| Segment { ring: r, index: i, line })
        })
        .collect();
    let ring_lens: Vec<usize> = rings.iter().map(|r| r.0.len().saturating_sub(1)).collect();
    let tree = RTree::bulk_load(segments);

    for a in tree.iter() {
        for b in tree.locate_in_envelope_intersecting(&a.envelope()) {
            if a.ring == b.ring {
                if b.index <= a.index {
                    continue;
                }
                let last = ring_lens[a.ring] - 1;
                let adjacent = b.index == a.index + 1 || (a.index == 0 && b.index == last);
                if adjacent {
                    continue;
                }
            } else if b.ring < a.ring {
                continue;
            }
            if a.line.intersects(&b.line) {
                return true;
            }
        }
    }
    false
}

/// Simplifies one polygon, or returns `None` when the result would be
/// degenerate.
pub fn simplify_polygon(polygon: &Polygon<f64>, tolerance: f64) -> Option<Polygon<f64>> {
    let exterior = polygon.exterior().simplify(&tolerance);
    let interiors: Vec<LineString<f64>> = polygon
        .interiors()
        .iter()
        .map(|ring| ring.simplify(&tolerance))
        .collect();

    if std::iter::once(&exterior)
        .chain(interiors.iter())
        .any(|ring| distinct_vertices(ring) < 3)
    {
        return None;
    }

    let simplified = Polygon::new(exterior, interiors);
    if simplified.unsigned_area() == 0.0 {
        return None;
    }
    if simplified.coords_count() == polygon.coords_count() {
        return Some(simplified);
    }

    let rings: Vec<&LineString<f64>> = std::iter::once(simplified.exterior())
        .chain(simplified.interiors().iter())
        .collect();
    if has_crossings(&rings) {
        return None;
    }

    Some(simplified)
}

/// Simplifies each part, then falls back to the original parts when the
/// simplified parts of one tract cross each other.
pub fn simplify_multipolygon(
    geometry: &MultiPolygon<f64>,
    tolerance: f64,
) -> (MultiPolygon<f64>, SimplifyStats) {
    let mut stats = SimplifyStats::default();
    let mut changed = 0;
    let mut parts: Vec<Polygon<f64>> = geometry
        .0
        .iter()
        .map(|p| {
            stats.polygons += 1;
            stats.vertices_before += p.coords_count();
            match simplify_polygon(p, tolerance) {
                Some(s) => {
                    if s.coords_count() != p.coords_count() {
                        changed += 1;
                    }
                    s
                }
                None => {
                    stats.fallbacks += 1;
                    p.clone()
                }
            }
        })
        .collect();

    if parts.len() > 1 && changed > 0 {
        let rings: Vec<&LineString<f64>> = parts
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
            .collect();
        if has_crossings(&rings) {
            stats.fallbacks += changed;
            parts = geometry.0.clone();
        }
    }

    stats.vertices_after = parts.iter().map(|p| p.coords_count()).sum();
    (MultiPolygon::new(parts), stats)
}

/// Simplifies every tract in parallel. Output order matches input order.
pub fn simplify_tracts(
    tracts: Vec<JoinedTract>,
    tolerance: f64,
) -> (Vec<JoinedTract>, SimplifyStats) {
    if tolerance <= 0.0 {
        let vertices: usize = tracts.iter().map(|t| t.geometry.coords_count()).sum();
        let stats = SimplifyStats {
            polygons: tracts.iter().map(|t| t.geometry.0.len()).sum(),
            fallbacks: 0,
            vertices_before: vertices,
            vertices_after: vertices,
        };
        return (tracts, stats);
    }

    let results: Vec<(JoinedTract, SimplifyStats)> = tracts
        .into_par_iter()
        .map(|mut tract| {
            let (geometry, stats) = simplify_multipolygon(&tract.geometry, tolerance);
            tract.geometry = geometry;
            (tract, stats)
        })
        .collect();

    let mut total = SimplifyStats::default();
    let tracts = results
        .into_iter()
        .map(|(tract, stats)| {
            total += stats;
            tract
        })
        .collect();
    (tracts, total)
}
