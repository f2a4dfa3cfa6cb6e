//! # Ring reduction and the sliding edge window
//!
//! Timezone Boundary Builder polygons are dense; the reducer thins them to
//! the resolution the tree actually needs before any geometry runs. The
//! surviving vertices are then padded so that a sliding 4-vertex window
//! yields every edge of the closed polygon exactly once, with one vertex of
//! context on each side for the crossing predicate's tie-breaks.

use geo::{Distance, Haversine, Point};
use tzatlas::Position;

/// Vertices closer than this (in meters) to the last kept vertex are
/// dropped, except near the poles.
pub const DEFAULT_MIN_RING_DISTANCE: f64 = 500.0;

/// Beyond this latitude every distinct vertex is kept: meridians converge,
/// so small angular steps still matter.
const POLAR_LATITUDE: f32 = 70.0;

/// A closed polygon boundary, reduced and padded.
///
/// The stored sequence is `[tail, v0, v1, …, tail, v0, v1]`, so
/// [`edge_windows`] produces one `(I₋₁, I, J, J₊₁)` window per edge of the
/// closed ring, including the closing edge `tail → v0`.
///
/// [`edge_windows`]: Ring::edge_windows
#[derive(Debug, Clone, PartialEq)]
pub struct Ring {
    vertices: Vec<Position>,
}

impl Ring {
    /// Reduces and pads a raw GeoJSON ring.
    ///
    /// `raw` must hold at least two positions and end with the closing
    /// duplicate of its first position, which is skipped.
    pub fn new(raw: &[Position], min_distance: f64) -> Self {
        debug_assert!(raw.len() >= 2, "a ring needs at least a vertex and its closing duplicate");

        let mut vertices = Vec::with_capacity(raw.len() + 3);
        vertices.push(raw[0]);
        let mut last = raw[0];
        for &vertex in &raw[1..raw.len() - 1] {
            let keep = haversine_meters(last, vertex) > min_distance
                || (vertex.lat.abs() > POLAR_LATITUDE && vertex != last);
            if keep {
                vertices.push(vertex);
                last = vertex;
            }
        }

        let tail = vertices[vertices.len() - 1];
        let first = vertices[0];
        let second = vertices.get(1).copied().unwrap_or(first);
        vertices.insert(0, tail);
        vertices.push(first);
        vertices.push(second);

        Self { vertices }
    }

    /// The number of edges in the closed ring.
    pub fn edge_count(&self) -> usize {
        self.vertices.len() - 3
    }

    /// The first real (unpadded) vertex.
    pub fn first_vertex(&self) -> Position {
        self.vertices[1]
    }

    /// One window per edge: `[I₋₁, I, J, J₊₁]` for the edge `I → J`.
    pub fn edge_windows(&self) -> impl Iterator<Item = [Position; 4]> + '_ {
        self.vertices.windows(4).map(|w| [w[0], w[1], w[2], w[3]])
    }
}

fn haversine_meters(a: Position, b: Position) -> f64 {
    Haversine.distance(
        Point::new(f64::from(a.lon), f64::from(a.lat)),
        Point::new(f64::from(b.lon), f64::from(b.lat)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Position> {
        vec![
            Position::new(0.0, 0.0),
            Position::new(45.0, 0.0),
            Position::new(45.0, 45.0),
            Position::new(0.0, 45.0),
            Position::new(0.0, 0.0),
        ]
    }

    #[test]
    fn padding_wraps_the_ring_for_the_window() {
        let ring = Ring::new(&square(), DEFAULT_MIN_RING_DISTANCE);
        assert_eq!(ring.edge_count(), 4);
        let windows: Vec<_> = ring.edge_windows().collect();
        assert_eq!(windows.len(), 4);
        // The first window's edge starts at the first real vertex with the
        // ring tail as context; the last window closes the ring.
        assert_eq!(windows[0][0], Position::new(0.0, 45.0));
        assert_eq!(windows[0][1], Position::new(0.0, 0.0));
        assert_eq!(windows[3][1], Position::new(0.0, 45.0));
        assert_eq!(windows[3][2], Position::new(0.0, 0.0));
        assert_eq!(windows[3][3], Position::new(45.0, 0.0));
    }

    #[test]
    fn dense_vertices_are_dropped() {
        // ~55 m steps at the equator, far below the 500 m default.
        let raw: Vec<Position> = (0..100)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let lon = 0.0005 * i as f32;
                Position::new(lon, 0.0)
            })
            .chain([Position::new(0.05, 10.0), Position::new(0.0, 0.0)])
            .collect();
        let ring = Ring::new(&raw, DEFAULT_MIN_RING_DISTANCE);
        // Of the dense run only vertices ≥ 500 m apart survive.
        assert!(ring.edge_count() < 20, "got {} edges", ring.edge_count());
    }

    #[test]
    fn polar_vertices_survive_reduction() {
        let raw: Vec<Position> = (0..10)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let lon = 0.0005 * i as f32;
                Position::new(lon, 75.0)
            })
            .chain([Position::new(0.002, 80.0), Position::new(0.0, 75.0)])
            .collect();
        let ring = Ring::new(&raw, DEFAULT_MIN_RING_DISTANCE);
        assert_eq!(ring.edge_count(), 11, "every distinct polar vertex is kept");
    }

    #[test]
    fn single_vertex_ring_still_pads_to_a_window() {
        let raw = vec![Position::new(1.0, 2.0), Position::new(1.0, 2.0)];
        let ring = Ring::new(&raw, DEFAULT_MIN_RING_DISTANCE);
        assert_eq!(ring.edge_count(), 1);
        assert_eq!(ring.edge_windows().count(), 1);
    }
}
