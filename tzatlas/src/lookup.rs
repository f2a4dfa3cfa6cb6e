//! # Lookup API
//!
//! [`TimeZoneLookup`] wraps a loaded [`TimeZoneTree`] and answers coordinate
//! queries by descending the tree; it never touches polygons. The handle is
//! immutable and fully re-entrant, so one instance can serve any number of
//! threads.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::codec::{self, DecodeError};
use crate::spatial::BBox;
use crate::tree::TimeZoneTree;
use crate::zone_index::TimeZoneIndex;

/// Rejections at the public query boundary; internals never produce these.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f32),
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f32),
    #[error("time zone index {index} is out of range (1..={max})")]
    IndexOutOfRange { index: u16, max: u16 },
    #[error("unknown time zone id: {0}")]
    UnknownId(String),
}

/// Failures materializing a [`TimeZoneLookup`] from disk or a stream.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("time zone data at {} is not readable", path.display())]
    NotReadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("the time zone data is already loaded")]
    AlreadyLoaded,
}

/// Synthesizes the nautical `Etc/GMT` identifier for a longitude.
///
/// Zone `k = round(-lon / 15)`: zero is plain `"Etc/GMT"`, positive offsets
/// are `"Etc/GMT+k"`, negative ones `"Etc/GMT-k"` (the sign rides along).
/// Note the POSIX-style inversion: zones east of Greenwich get the `-` name.
///
/// # Errors
///
/// Longitudes outside `[-180, 180]` (including NaN) are rejected.
pub fn etc_gmt(lon: f32) -> Result<String, LookupError> {
    if !(-180.0..=180.0).contains(&lon) {
        return Err(LookupError::LongitudeOutOfRange(lon));
    }
    #[allow(clippy::cast_possible_truncation)]
    let offset = (-f64::from(lon) / 15.0).round() as i32;
    Ok(match offset {
        0 => "Etc/GMT".to_owned(),
        o if o > 0 => format!("Etc/GMT+{o}"),
        o => format!("Etc/GMT{o}"),
    })
}

fn check_coordinates(lon: f32, lat: f32) -> Result<(), LookupError> {
    if !(-180.0..=180.0).contains(&lon) {
        return Err(LookupError::LongitudeOutOfRange(lon));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(LookupError::LatitudeOutOfRange(lat));
    }
    Ok(())
}

/// An immutable, thread-safe handle over one loaded tree.
#[derive(Debug)]
pub struct TimeZoneLookup {
    tree: TimeZoneTree,
}

impl TimeZoneLookup {
    pub fn from_tree(tree: TimeZoneTree) -> Self {
        Self { tree }
    }

    /// Reads a serialized tree from the stream, consuming it.
    ///
    /// # Errors
    ///
    /// Propagates any [`DecodeError`] from the codec.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LoadError> {
        Ok(Self::from_tree(codec::deserialize(reader)?))
    }

    /// Reads a serialized tree from a file.
    ///
    /// # Errors
    ///
    /// `NotReadable` when the file cannot be opened, otherwise any decode
    /// failure.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::NotReadable {
            path: path.to_owned(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn tree(&self) -> &TimeZoneTree {
        &self.tree
    }

    /// The leaf payload for a coordinate.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range or NaN coordinates.
    pub fn index_at(&self, lon: f32, lat: f32) -> Result<TimeZoneIndex, LookupError> {
        check_coordinates(lon, lat)?;
        Ok(self.tree.locate(lon, lat).0.index())
    }

    /// The leaf payload plus the leaf cell and its depth.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range or NaN coordinates.
    pub fn box_at(&self, lon: f32, lat: f32) -> Result<(TimeZoneIndex, BBox, u8), LookupError> {
        check_coordinates(lon, lat)?;
        let (node, bbox, level) = self.tree.locate(lon, lat);
        Ok((node.index(), bbox, level))
    }

    /// The primary time zone id for a coordinate; never empty — dataset gaps
    /// (oceans) fall back to the synthetic `Etc/GMT` zone.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range or NaN coordinates.
    pub fn id_at(&self, lon: f32, lat: f32) -> Result<Cow<'_, str>, LookupError> {
        let index = self.index_at(lon, lat)?;
        match index.first() {
            0 => Ok(Cow::Owned(etc_gmt(lon)?)),
            first => Ok(Cow::Borrowed(self.id_of(first)?)),
        }
    }

    /// Every id applying to a coordinate: the primary (or the `Etc/GMT`
    /// fallback) plus the secondary id of a disputed area, if any.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range or NaN coordinates.
    pub fn all_ids_at(&self, lon: f32, lat: f32) -> Result<Vec<Cow<'_, str>>, LookupError> {
        let index = self.index_at(lon, lat)?;
        let mut ids = Vec::with_capacity(2);
        match index.first() {
            0 => ids.push(Cow::Owned(etc_gmt(lon)?)),
            first => ids.push(Cow::Borrowed(self.id_of(first)?)),
        }
        if index.second() != 0 {
            ids.push(Cow::Borrowed(self.id_of(index.second())?));
        }
        Ok(ids)
    }

    /// Resolves an id to its 1-based index, ignoring ASCII case.
    ///
    /// # Errors
    ///
    /// `UnknownId` when the id is not in the table.
    pub fn index_of(&self, id: &str) -> Result<u16, LookupError> {
        self.tree
            .time_zone_ids()
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(id))
            .and_then(|i| u16::try_from(i + 1).ok())
            .ok_or_else(|| LookupError::UnknownId(id.to_owned()))
    }

    /// Resolves a 1-based index to its id.
    ///
    /// # Errors
    ///
    /// `IndexOutOfRange` for `0` or anything beyond the table.
    pub fn id_of(&self, index: u16) -> Result<&str, LookupError> {
        let max = self.max_index();
        if index == 0 || index > max {
            return Err(LookupError::IndexOutOfRange { index, max });
        }
        Ok(&self.tree.time_zone_ids()[usize::from(index) - 1])
    }

    /// Invokes the callback with the cell of every leaf matching the query:
    /// containment of `first` when `second` is unset, exact payload equality
    /// otherwise.
    pub fn traverse<F: FnMut(BBox)>(&self, query: TimeZoneIndex, mut callback: F) {
        self.tree.visit_matching(query, &mut callback);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn max_index(&self) -> u16 {
        // The codec and the builder both cap the table below u16::MAX.
        self.tree.time_zone_ids().len() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::Position;
    use crate::tree::TreeNode;
    use proptest::proptest;

    fn lookup() -> TimeZoneLookup {
        // Root splits longitude; east half splits latitude into a
        // single-zone NE leaf and a disputed SE leaf; west half is ocean.
        let east = TreeNode::branch(
            TimeZoneIndex::EMPTY,
            TreeNode::leaf(TimeZoneIndex::single(1)),
            TreeNode::leaf(TimeZoneIndex::pair(1, 2)),
        );
        let root = TreeNode::branch(TimeZoneIndex::EMPTY, east, TreeNode::leaf(TimeZoneIndex::EMPTY));
        TimeZoneLookup::from_tree(TimeZoneTree::new(
            root,
            vec!["Europe/Paris".to_owned(), "Africa/Algiers".to_owned()],
        ))
    }

    #[test]
    fn etc_gmt_matches_the_reference_table() {
        let cases = [
            (0.0, "Etc/GMT"),
            (0.1, "Etc/GMT"),
            (-0.1, "Etc/GMT"),
            (7.4, "Etc/GMT"),
            (7.6, "Etc/GMT-1"),
            (-7.6, "Etc/GMT+1"),
            (22.4, "Etc/GMT-1"),
            (22.6, "Etc/GMT-2"),
            (179.9, "Etc/GMT-12"),
            (180.0, "Etc/GMT-12"),
            (-180.0, "Etc/GMT+12"),
        ];
        for (lon, expected) in cases {
            assert_eq!(etc_gmt(lon).expect("in range"), expected, "lon {lon}");
        }
        assert!(matches!(etc_gmt(181.0), Err(LookupError::LongitudeOutOfRange(_))));
        assert!(matches!(etc_gmt(f32::NAN), Err(LookupError::LongitudeOutOfRange(_))));
    }

    proptest! {
        #[test]
        fn etc_gmt_is_always_a_valid_nautical_zone(lon in -180.0f32..=180.0) {
            let id = etc_gmt(lon).expect("in range");
            let offset: i32 = match id.strip_prefix("Etc/GMT") {
                Some("") => 0,
                Some(rest) => rest.parse().expect("suffix should be a signed integer"),
                None => panic!("unexpected id {id}"),
            };
            assert!((-12..=12).contains(&offset), "{id}");
        }
    }

    #[test]
    fn id_at_resolves_zones_and_falls_back_to_ocean() {
        let lookup = lookup();
        assert_eq!(lookup.id_at(10.0, 45.0).expect("query"), "Europe/Paris");
        // The western half is an empty leaf: ocean fallback.
        assert_eq!(lookup.id_at(-150.0, 0.0).expect("query"), "Etc/GMT+10");
    }

    #[test]
    fn all_ids_at_reports_disputed_areas_in_slot_order() {
        let lookup = lookup();
        let ids = lookup.all_ids_at(10.0, -45.0).expect("query");
        assert_eq!(ids, vec!["Europe/Paris", "Africa/Algiers"]);
    }

    #[test]
    fn coordinate_validation_rejects_out_of_range_and_nan() {
        let lookup = lookup();
        assert!(matches!(lookup.index_at(200.0, 0.0), Err(LookupError::LongitudeOutOfRange(_))));
        assert!(matches!(lookup.index_at(0.0, -90.5), Err(LookupError::LatitudeOutOfRange(_))));
        assert!(matches!(lookup.index_at(0.0, f32::NAN), Err(LookupError::LatitudeOutOfRange(_))));
    }

    #[test]
    fn index_of_is_case_insensitive_and_round_trips() {
        let lookup = lookup();
        assert_eq!(lookup.index_of("europe/paris").expect("known id"), 1);
        for index in 1..=2 {
            let id = lookup.id_of(index).expect("in range");
            assert_eq!(lookup.index_of(id).expect("known id"), index);
        }
        assert!(matches!(lookup.index_of("Mars/Olympus"), Err(LookupError::UnknownId(_))));
    }

    #[test]
    fn id_of_checks_bounds() {
        let lookup = lookup();
        assert!(matches!(lookup.id_of(0), Err(LookupError::IndexOutOfRange { .. })));
        assert!(matches!(lookup.id_of(3), Err(LookupError::IndexOutOfRange { .. })));
    }

    #[test]
    fn box_at_returns_the_leaf_cell() {
        let lookup = lookup();
        let (index, bbox, level) = lookup.box_at(10.0, 45.0).expect("query");
        assert_eq!(index, TimeZoneIndex::single(1));
        assert_eq!(level, 2);
        assert!(bbox.contains(Position::new(10.0, 45.0)));
    }

    #[test]
    fn traverse_collects_matching_cells() {
        let lookup = lookup();
        let mut cells = Vec::new();
        lookup.traverse(TimeZoneIndex::single(1), |bbox| cells.push(bbox));
        assert_eq!(cells.len(), 2);

        let mut cells = Vec::new();
        lookup.traverse(TimeZoneIndex::single(2), |bbox| cells.push(bbox));
        assert_eq!(cells.len(), 1, "containment matching finds the disputed leaf");

        let mut cells = Vec::new();
        lookup.traverse(TimeZoneIndex::pair(2, 1), |bbox| cells.push(bbox));
        assert!(cells.is_empty(), "exact matching respects slot order");
    }

    #[test]
    fn descent_is_deterministic() {
        let lookup = lookup();
        let first = lookup.index_at(3.3, -7.7).expect("query");
        for _ in 0..10 {
            assert_eq!(lookup.index_at(3.3, -7.7).expect("query"), first);
        }
    }
}
