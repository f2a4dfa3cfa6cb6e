//! # Point and edge predicates
//!
//! The classifier underneath the whole builder: a segment-crossing test with
//! explicit degenerate-case handling, a parity ray-cast, and the three-way
//! box-versus-ring relation that drives the recursive partition.
//!
//! All determinants are evaluated in `f64`; promoting the `f32` coordinates
//! is exact, so sign tests stay consistent across call sites.

use tzatlas::{BBox, Position};

use crate::ring::Ring;

/// The far end of every ray-cast. The latitude is deliberately outside the
/// valid range, so no real vertex can ever coincide with it.
pub(crate) const OUTSIDE: Position = Position::new(0.0, 200.0);

/// Twice the signed area of the triangle `(o, a, b)`.
fn det(o: Position, a: Position, b: Position) -> f64 {
    let (ox, oy) = (f64::from(o.lon), f64::from(o.lat));
    let (ax, ay) = (f64::from(a.lon), f64::from(a.lat));
    let (bx, by) = (f64::from(b.lon), f64::from(b.lat));
    (ax - ox) * (by - oy) - (ay - oy) * (bx - ox)
}

/// Whether `p`, known to be collinear with `a → b`, lies on the segment.
/// Endpoints count; between-ness is decided on whichever axis the segment
/// actually spans.
fn within_span(p: Position, a: Position, b: Position) -> bool {
    if p == a || p == b {
        return true;
    }
    if a.lon == b.lon {
        (a.lat < p.lat) != (b.lat < p.lat)
    } else {
        (a.lon < p.lon) != (b.lon < p.lon)
    }
}

/// Whether the query segment `q → r` crosses the ring edge `I → J`.
///
/// The window carries the edge's neighbor vertices so that touching ties can
/// be resolved by looking one vertex past each endpoint:
///
/// - `q` exactly on the edge sets `on_edge`. If `r` is collinear too, the
///   pair crosses iff `I₋₁` and `J₊₁` fall on opposite sides of `q → r`.
/// - The edge's start vertex `I` exactly on `q → r` crosses iff `I₋₁` and
///   `J` fall on opposite sides; the matching `J`-on-segment event belongs
///   to the next window, so each vertex hit is counted once.
pub(crate) fn crossing(window: [Position; 4], q: Position, r: Position, on_edge: &mut bool) -> bool {
    let [prev, i, j, next] = window;

    let dq = det(q, i, j);
    let dr = det(r, i, j);

    if dq == 0.0 && within_span(q, i, j) {
        *on_edge = true;
        return dr == 0.0 && det(prev, q, r) * det(next, q, r) < 0.0;
    }

    let di = det(i, q, r);
    let dj = det(j, q, r);

    if di == 0.0 && within_span(i, q, r) {
        return det(prev, q, r) * det(j, q, r) < 0.0;
    }

    dq != 0.0
        && dr != 0.0
        && di != 0.0
        && dj != 0.0
        && (dq > 0.0) != (dr > 0.0)
        && (di > 0.0) != (dj > 0.0)
}

/// Parity ray-cast from `p` towards [`OUTSIDE`]. Points exactly on the
/// boundary count as inside.
pub(crate) fn point_in_ring(ring: &Ring, p: Position) -> bool {
    let mut inside = false;
    let mut on_edge = false;
    for window in ring.edge_windows() {
        if crossing(window, p, OUTSIDE, &mut on_edge) {
            inside = !inside;
        }
        if on_edge {
            return true;
        }
    }
    inside
}

/// The three-way outcome of classifying a box against a ring. `subset`
/// implies `overlapping`; both false means disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Relation {
    pub subset: bool,
    pub overlapping: bool,
}

/// Classifies `bbox` against the ring in a single walk.
///
/// Per ring edge this tests the four box edges for crossings and touches,
/// and advances four corner ray-casts whose parity freezes as soon as the
/// corner is found to sit on the boundary. A ring wholly inside the box has
/// no corner inside it and no edge crossings, so the overlap test falls
/// through to containment of the ring's first vertex.
pub(crate) fn box_ring_relation(ring: &Ring, bbox: &BBox) -> Relation {
    let corners = bbox.corners();
    let mut edge_crossing = false;
    let mut on_edge = false;
    let mut corner_inside = [false; 4];
    let mut corner_on_edge = [false; 4];

    for window in ring.edge_windows() {
        for k in 0..4 {
            edge_crossing |= crossing(window, corners[k], corners[(k + 1) % 4], &mut on_edge);
        }
        for k in 0..4 {
            if corner_on_edge[k] {
                continue;
            }
            let mut corner_touch = false;
            let crossed = crossing(window, corners[k], OUTSIDE, &mut corner_touch);
            if corner_touch {
                corner_on_edge[k] = true;
            } else if crossed {
                corner_inside[k] = !corner_inside[k];
            }
        }
    }

    let all_corners_inside = (0..4).all(|k| corner_on_edge[k] || corner_inside[k]);
    Relation {
        subset: all_corners_inside && !edge_crossing && !on_edge,
        overlapping: all_corners_inside
            || edge_crossing
            || on_edge
            || bbox.contains(ring.first_vertex()),
    }
}
