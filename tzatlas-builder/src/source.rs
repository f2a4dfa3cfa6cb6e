//! # GeoJSON source loader
//!
//! Streams a Timezone Boundary Builder `FeatureCollection` and turns every
//! feature into an immutable [`TimeZoneSource`]: the outer boundary of each
//! polygon becomes an included ring, holes become excluded rings, and all of
//! them pass through the reducer on the way in.

use std::collections::HashMap;
use std::io::Read;

use geojson::{FeatureReader, Value};
use thiserror::Error;
use tracing::info;
use tzatlas::Position;
use tzatlas::codec::MAX_TIME_ZONE_IDS;

use crate::ring::Ring;

/// Rejections while parsing the GeoJSON input.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("GeoJSON parse error: {0}")]
    Geojson(#[from] geojson::Error),
    #[error("feature {index} has no geometry")]
    MissingGeometry { index: usize },
    #[error("feature {index} has no tzid property")]
    MissingId { index: usize },
    #[error("feature {index} ({id}) has geometry type {kind}, expected Polygon or MultiPolygon")]
    UnsupportedGeometry {
        index: usize,
        id: String,
        kind: &'static str,
    },
    #[error("feature {index} ({id}) has a degenerate ring")]
    DegenerateRing { index: usize, id: String },
    #[error("{0} features exceed the format limit of {MAX_TIME_ZONE_IDS}")]
    TooManyFeatures(usize),
}

/// One input feature: a time zone with its boundary rings.
#[derive(Debug, Clone)]
pub struct TimeZoneSource {
    /// 1-based index, also the leaf payload value referring to this zone.
    pub index: u16,
    /// The IANA identifier from `properties.tzid`.
    pub id: String,
    /// Outer boundaries.
    pub included: Vec<Ring>,
    /// Holes.
    pub excluded: Vec<Ring>,
}

/// The full source table, indexed both ways.
#[derive(Debug, Default)]
pub struct TimeZoneSources {
    sources: Vec<TimeZoneSource>,
    by_id: HashMap<String, u16>,
}

impl TimeZoneSources {
    /// Streams a GeoJSON `FeatureCollection`, assigning 1-based indices in
    /// traversal order.
    ///
    /// # Errors
    ///
    /// Any parse failure or unsupported geometry aborts the load; see
    /// [`LoadError`].
    pub fn load<R: Read>(reader: R, min_ring_distance: f64) -> Result<Self, LoadError> {
        let mut sources = Vec::new();
        let mut by_id = HashMap::new();

        for (position, feature) in FeatureReader::from_reader(reader).features().enumerate() {
            let feature = feature?;
            let count = sources.len();
            if count >= MAX_TIME_ZONE_IDS {
                return Err(LoadError::TooManyFeatures(count + 1));
            }
            #[allow(clippy::cast_possible_truncation)]
            let index = (count + 1) as u16;

            let id = feature
                .property("tzid")
                .and_then(|value| value.as_str())
                .ok_or(LoadError::MissingId { index: position })?
                .to_owned();
            let geometry = feature
                .geometry
                .as_ref()
                .ok_or(LoadError::MissingGeometry { index: position })?;

            let mut source = TimeZoneSource {
                index,
                id: id.clone(),
                included: Vec::new(),
                excluded: Vec::new(),
            };
            match &geometry.value {
                Value::Polygon(rings) => {
                    convert_polygon(rings, &mut source, position, min_ring_distance)?;
                }
                Value::MultiPolygon(polygons) => {
                    for rings in polygons {
                        convert_polygon(rings, &mut source, position, min_ring_distance)?;
                    }
                }
                other => {
                    return Err(LoadError::UnsupportedGeometry {
                        index: position,
                        id,
                        kind: other.type_name(),
                    });
                }
            }

            by_id.insert(id, index);
            sources.push(source);
        }

        info!(zones = sources.len(), "loaded time zone sources");
        Ok(Self { sources, by_id })
    }

    /// Assembles a table from pre-built sources, e.g. for synthetic data.
    ///
    /// Sources must already carry contiguous 1-based indices in order, as
    /// the loader assigns them.
    pub fn from_sources(sources: Vec<TimeZoneSource>) -> Self {
        debug_assert!(
            sources
                .iter()
                .enumerate()
                .all(|(i, source)| usize::from(source.index) == i + 1),
            "source indices must be 1-based and contiguous"
        );
        let by_id = sources
            .iter()
            .map(|source| (source.id.clone(), source.index))
            .collect();
        Self { sources, by_id }
    }

    /// Resolves a 1-based index; `None` for `0` or past the table.
    pub fn get(&self, index: u16) -> Option<&TimeZoneSource> {
        index
            .checked_sub(1)
            .and_then(|i| self.sources.get(usize::from(i)))
    }

    pub fn index_of(&self, id: &str) -> Option<u16> {
        self.by_id.get(id).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeZoneSource> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The id table in index order, as stored in the serialized tree.
    pub fn ids(&self) -> Vec<String> {
        self.sources.iter().map(|source| source.id.clone()).collect()
    }
}

/// First ring is the outer boundary, the rest are holes.
fn convert_polygon(
    rings: &[Vec<Vec<f64>>],
    source: &mut TimeZoneSource,
    feature_index: usize,
    min_ring_distance: f64,
) -> Result<(), LoadError> {
    for (ring_index, ring) in rings.iter().enumerate() {
        let converted = convert_ring(ring, feature_index, &source.id, min_ring_distance)?;
        if ring_index == 0 {
            source.included.push(converted);
        } else {
            source.excluded.push(converted);
        }
    }
    Ok(())
}

fn convert_ring(
    coordinates: &[Vec<f64>],
    feature_index: usize,
    id: &str,
    min_ring_distance: f64,
) -> Result<Ring, LoadError> {
    // RFC 7946 requires at least four positions, the last closing the ring.
    if coordinates.len() < 4 {
        return Err(LoadError::DegenerateRing {
            index: feature_index,
            id: id.to_owned(),
        });
    }
    let mut raw = Vec::with_capacity(coordinates.len());
    for coordinate in coordinates {
        let [lon, lat, ..] = coordinate.as_slice() else {
            return Err(LoadError::DegenerateRing {
                index: feature_index,
                id: id.to_owned(),
            });
        };
        // 32-bit degrees are the precision of the data model.
        #[allow(clippy::cast_possible_truncation)]
        raw.push(Position::new(*lon as f32, *lat as f32));
    }
    Ok(Ring::new(&raw, min_ring_distance))
}
