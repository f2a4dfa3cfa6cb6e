//! # Spatial primitives
//!
//! Positions are plain `(longitude, latitude)` pairs of 32-bit degrees;
//! bounding boxes bisect along alternating axes so that every five levels of
//! subdivision land on a geohash-compatible grid.

/// A geographic coordinate in degrees, longitude first.
///
/// Equality is bitwise-exact; no normalization or wrap-around is applied.
/// Range validation happens at the public lookup boundary, not here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lon: f32,
    pub lat: f32,
}

impl Position {
    pub const fn new(lon: f32, lat: f32) -> Self {
        Self { lon, lat }
    }
}

/// An axis-aligned box on the plate carrée plane, closed on all sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub sw: Position,
    pub ne: Position,
}

impl BBox {
    /// The whole world; the root cell of every tree.
    pub const WORLD: Self = Self {
        sw: Position::new(-180.0, -90.0),
        ne: Position::new(180.0, 90.0),
    };

    pub const fn new(sw: Position, ne: Position) -> Self {
        Self { sw, ne }
    }

    /// Bisects the box for the given subdivision level.
    ///
    /// Even levels split along longitude, odd levels along latitude, and the
    /// returned pair is `(hi, lo)` where `hi` owns the half with the greater
    /// coordinate on the split axis. Interleaving one longitude bit with one
    /// latitude bit per pair of levels is exactly the geohash bit order, so
    /// depth `5k` cells coincide with `k`-character geohashes.
    pub fn split(&self, level: u8) -> (Self, Self) {
        if level % 2 == 0 {
            let mid = (self.sw.lon + self.ne.lon) / 2.0;
            (
                Self::new(Position::new(mid, self.sw.lat), self.ne),
                Self::new(self.sw, Position::new(mid, self.ne.lat)),
            )
        } else {
            let mid = (self.sw.lat + self.ne.lat) / 2.0;
            (
                Self::new(Position::new(self.sw.lon, mid), self.ne),
                Self::new(self.sw, Position::new(self.ne.lon, mid)),
            )
        }
    }

    /// Whether the position lies inside the box, boundary included.
    pub fn contains(&self, p: Position) -> bool {
        p.lon >= self.sw.lon && p.lon <= self.ne.lon && p.lat >= self.sw.lat && p.lat <= self.ne.lat
    }

    /// The four corners in SW, NW, NE, SE order.
    pub fn corners(&self) -> [Position; 4] {
        [
            self.sw,
            Position::new(self.sw.lon, self.ne.lat),
            self.ne,
            Position::new(self.ne.lon, self.sw.lat),
        ]
    }

    /// Interpolates between the SW and NE corners, per axis.
    ///
    /// `(0, 0)` is the SW corner, `(1, 1)` the NE corner. The consolidation
    /// sampling grid draws its 25 probe points through this.
    pub fn lerp(&self, fx: f32, fy: f32) -> Position {
        Position::new(
            self.sw.lon + (self.ne.lon - self.sw.lon) * fx,
            self.sw.lat + (self.ne.lat - self.sw.lat) * fy,
        )
    }
}
