//! # Binary tree codec
//!
//! The on-disk format is a gzip stream containing, in little-endian order:
//!
//! ```text
//! u16    N                 number of time zone ids (1..=32767)
//! N x    varint len + UTF-8 bytes
//! node*  preorder
//! ```
//!
//! A node starts with its payload: `!first` then `second` as two `i16`s when
//! both slots are set (the complement marks the two-index case; valid
//! indices are positive, so the marker is negative but never `-1`), or a
//! single `i16` otherwise (`0` is an empty leaf). The next `i16` is either
//! the `-1` leaf sentinel or already the first short of the `hi` child,
//! followed by the rest of `hi` and then the whole `lo` subtree. The stream
//! is self-delimiting and must be read strictly sequentially.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use integer_encoding::{VarIntReader, VarIntWriter};
use thiserror::Error;

use crate::tree::{TimeZoneTree, TreeNode};
use crate::zone_index::TimeZoneIndex;

/// Default file name of a serialized tree, next to the host executable.
pub const DATA_FILE_NAME: &str = "tzatlas.bin";

/// The wire format stores indices as positive `i16`s.
pub const MAX_TIME_ZONE_IDS: usize = i16::MAX as usize;

const LEAF_SENTINEL: i16 = -1;

/// No legitimate tree nests deeper than its build `max_level`; this bounds
/// stack use when reading untrusted bytes.
const MAX_NODE_DEPTH: usize = 64;

/// Longest accepted id string; IANA identifiers are far shorter.
const MAX_ID_LEN: u32 = 1024;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error while writing the tree: {0}")]
    Io(#[from] io::Error),
    #[error("cannot serialize an empty id table")]
    EmptyIdTable,
    #[error("{0} time zone ids exceed the wire format limit of {MAX_TIME_ZONE_IDS}")]
    TooManyZones(usize),
    #[error("node payload index {0} does not fit the wire format")]
    IndexTooLarge(u16),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error at byte {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("unexpected end of stream at byte {offset}")]
    UnexpectedEof { offset: u64 },
    #[error("the id table is empty")]
    EmptyIdTable,
    #[error("time zone id at byte {offset} is {length} bytes long (limit {MAX_ID_LEN})")]
    IdTooLong { length: u32, offset: u64 },
    #[error("time zone id at byte {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: u64 },
    #[error("malformed node discriminator {value} at byte {offset}")]
    MalformedNode { value: i16, offset: u64 },
    #[error("time zone index {index} at byte {offset} is out of range (1..={max})")]
    IndexOutOfRange { index: i16, max: u16, offset: u64 },
    #[error("nodes nest deeper than {MAX_NODE_DEPTH} levels at byte {offset}")]
    NestingTooDeep { offset: u64 },
}

/// Serializes a tree into the gzip wire format.
///
/// # Errors
///
/// Fails on I/O errors from the underlying writer, on an empty or oversized
/// id table, and on payload indices beyond the id table bound.
pub fn serialize<W: Write>(tree: &TimeZoneTree, writer: W) -> Result<(), EncodeError> {
    let ids = tree.time_zone_ids();
    if ids.is_empty() {
        return Err(EncodeError::EmptyIdTable);
    }
    if ids.len() > MAX_TIME_ZONE_IDS {
        return Err(EncodeError::TooManyZones(ids.len()));
    }

    let mut encoder = GzEncoder::new(writer, Compression::default());
    // The bound above makes both casts infallible.
    #[allow(clippy::cast_possible_truncation)]
    encoder.write_u16::<LittleEndian>(ids.len() as u16)?;
    for id in ids {
        #[allow(clippy::cast_possible_truncation)]
        encoder.write_varint(id.len() as u32)?;
        encoder.write_all(id.as_bytes())?;
    }
    write_node(&mut encoder, tree.root())?;
    encoder.finish()?;
    Ok(())
}

/// Serializes to `path` via a sibling temp file and an atomic rename, so a
/// crash or cancellation mid-write never leaves a partial file behind.
///
/// # Errors
///
/// Same as [`serialize`], plus I/O failures creating or renaming the file.
pub fn serialize_to_path<P: AsRef<Path>>(tree: &TimeZoneTree, path: P) -> Result<(), EncodeError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        serialize(tree, &mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

fn write_node<W: Write>(writer: &mut W, node: &TreeNode) -> Result<(), EncodeError> {
    let index = node.index();
    let first = i16::try_from(index.first()).map_err(|_| EncodeError::IndexTooLarge(index.first()))?;
    if index.second() == 0 {
        writer.write_i16::<LittleEndian>(first)?;
    } else {
        let second = i16::try_from(index.second()).map_err(|_| EncodeError::IndexTooLarge(index.second()))?;
        writer.write_i16::<LittleEndian>(!first)?;
        writer.write_i16::<LittleEndian>(second)?;
    }
    match node.children() {
        None => writer.write_i16::<LittleEndian>(LEAF_SENTINEL)?,
        Some((hi, lo)) => {
            // The hi child's first short doubles as the children discriminator.
            write_node(writer, hi)?;
            write_node(writer, lo)?;
        }
    }
    Ok(())
}

/// Reads a tree from the gzip wire format.
///
/// # Errors
///
/// Any structural defect surfaces as a [`DecodeError`] carrying the byte
/// offset (within the decompressed stream) where decoding stopped.
pub fn deserialize<R: Read>(reader: R) -> Result<TimeZoneTree, DecodeError> {
    let mut decoder = Decoder::new(GzDecoder::new(reader));
    decoder.read_tree()
}

/// Reads a tree from a file on disk.
///
/// # Errors
///
/// Fails when the file cannot be opened or its contents do not decode.
pub fn deserialize_from_path<P: AsRef<Path>>(path: P) -> Result<TimeZoneTree, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io { offset: 0, source })?;
    deserialize(BufReader::new(file))
}

struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

struct Decoder<R> {
    reader: CountingReader<R>,
    max_index: u16,
}

impl<R: Read> Decoder<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: CountingReader { inner, offset: 0 },
            max_index: 0,
        }
    }

    fn read_tree(&mut self) -> Result<TimeZoneTree, DecodeError> {
        let count = self.read_u16()?;
        if count == 0 {
            return Err(DecodeError::EmptyIdTable);
        }
        self.max_index = count;

        let mut ids = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            ids.push(self.read_id()?);
        }

        let first = self.read_i16()?;
        let root = self.read_node(first, 0)?;
        Ok(TimeZoneTree::new(root, ids))
    }

    fn read_id(&mut self) -> Result<String, DecodeError> {
        let offset = self.reader.offset;
        let length: u32 = self
            .reader
            .read_varint()
            .map_err(|source| map_io(source, offset))?;
        if length > MAX_ID_LEN {
            return Err(DecodeError::IdTooLong { length, offset });
        }
        let mut bytes = vec![0u8; length as usize];
        self.reader
            .read_exact(&mut bytes)
            .map_err(|source| map_io(source, offset))?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    fn read_node(&mut self, first: i16, depth: usize) -> Result<TreeNode, DecodeError> {
        let offset = self.reader.offset;
        if depth > MAX_NODE_DEPTH {
            return Err(DecodeError::NestingTooDeep { offset });
        }

        let index = if first >= 0 {
            self.checked_index(first, offset).map(TimeZoneIndex::single)?
        } else if first == LEAF_SENTINEL {
            return Err(DecodeError::MalformedNode { value: first, offset });
        } else {
            // Two-index payload: the first short is the complement of `first`.
            let first = self.checked_index(!first, offset)?;
            let second_raw = self.read_i16()?;
            let second = self.checked_index(second_raw, offset)?;
            TimeZoneIndex::pair(first, second)
        };

        let discriminator = self.read_i16()?;
        if discriminator == LEAF_SENTINEL {
            return Ok(TreeNode::leaf(index));
        }
        let hi = self.read_node(discriminator, depth + 1)?;
        let lo_first = self.read_i16()?;
        let lo = self.read_node(lo_first, depth + 1)?;
        Ok(TreeNode::branch(index, hi, lo))
    }

    /// Validates a wire index against the id table bound. `0` is only valid
    /// in the single-payload position, which passes `first >= 0` directly.
    fn checked_index(&self, value: i16, offset: u64) -> Result<u16, DecodeError> {
        let out_of_range = || DecodeError::IndexOutOfRange {
            index: value,
            max: self.max_index,
            offset,
        };
        let index = u16::try_from(value).map_err(|_| out_of_range())?;
        if index > self.max_index {
            return Err(out_of_range());
        }
        Ok(index)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let offset = self.reader.offset;
        self.reader
            .read_u16::<LittleEndian>()
            .map_err(|source| map_io(source, offset))
    }

    fn read_i16(&mut self) -> Result<i16, DecodeError> {
        let offset = self.reader.offset;
        self.reader
            .read_i16::<LittleEndian>()
            .map_err(|source| map_io(source, offset))
    }
}

fn map_io(source: io::Error, offset: u64) -> DecodeError {
    if source.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::UnexpectedEof { offset }
    } else {
        DecodeError::Io { offset, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone_index::TimeZoneIndex;

    fn sample_tree() -> TimeZoneTree {
        let east = TreeNode::branch(
            TimeZoneIndex::EMPTY,
            TreeNode::leaf(TimeZoneIndex::single(2)),
            TreeNode::leaf(TimeZoneIndex::pair(1, 3)),
        );
        let root = TreeNode::branch(TimeZoneIndex::single(1), east, TreeNode::leaf(TimeZoneIndex::EMPTY));
        TimeZoneTree::new(
            root,
            vec!["Europe/Paris".to_owned(), "Europe/Berlin".to_owned(), "Africa/Algiers".to_owned()],
        )
    }

    #[test]
    fn round_trip_preserves_everything() {
        let tree = sample_tree();
        let mut bytes = Vec::new();
        serialize(&tree, &mut bytes).expect("serialization should succeed");
        let restored = deserialize(bytes.as_slice()).expect("deserialization should succeed");
        assert_eq!(restored, tree);
        assert_eq!(restored.node_count(), tree.node_count());
    }

    #[test]
    fn two_index_payload_uses_the_complement_marker() {
        let mut bytes = Vec::new();
        write_node(&mut bytes, &TreeNode::leaf(TimeZoneIndex::pair(3, 5))).expect("write should succeed");
        // !3, 5, leaf sentinel
        assert_eq!(bytes, vec![0xFC, 0xFF, 0x05, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn empty_leaf_is_a_single_zero_short() {
        let mut bytes = Vec::new();
        write_node(&mut bytes, &TreeNode::leaf(TimeZoneIndex::EMPTY)).expect("write should succeed");
        assert_eq!(bytes, vec![0x00, 0x00, 0xFF, 0xFF]);
    }

    #[test]
    fn truncated_stream_reports_the_offset() {
        let tree = sample_tree();
        let mut bytes = Vec::new();
        serialize(&tree, &mut bytes).expect("serialization should succeed");

        // Re-compress a truncated copy of the decompressed payload so the
        // gzip layer stays intact and the codec itself hits the end.
        let mut payload = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut payload)
            .expect("payload should decompress");
        payload.truncate(payload.len() - 3);
        let mut truncated = Vec::new();
        {
            let mut encoder = GzEncoder::new(&mut truncated, Compression::default());
            encoder.write_all(&payload).expect("recompression should succeed");
            encoder.finish().expect("recompression should finish");
        }

        match deserialize(truncated.as_slice()) {
            Err(DecodeError::UnexpectedEof { offset }) => assert!(offset > 0),
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let tree = TimeZoneTree::new(TreeNode::leaf(TimeZoneIndex::single(7)), vec!["UTC".to_owned()]);
        let mut bytes = Vec::new();
        serialize(&tree, &mut bytes).expect("serialization should succeed");
        match deserialize(bytes.as_slice()) {
            Err(DecodeError::IndexOutOfRange { index: 7, max: 1, .. }) => {}
            other => panic!("expected IndexOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn empty_id_table_is_rejected_on_both_sides() {
        let tree = TimeZoneTree::new(TreeNode::leaf(TimeZoneIndex::EMPTY), Vec::new());
        let mut bytes = Vec::new();
        assert!(matches!(serialize(&tree, &mut bytes), Err(EncodeError::EmptyIdTable)));
    }

    #[test]
    fn serialize_to_path_persists_atomically() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join(DATA_FILE_NAME);
        let tree = sample_tree();
        serialize_to_path(&tree, &path).expect("serialization should succeed");
        assert!(!path.with_extension("tmp").exists(), "temp file should be gone");
        let restored = deserialize_from_path(&path).expect("file should deserialize");
        assert_eq!(restored, tree);
    }
}
