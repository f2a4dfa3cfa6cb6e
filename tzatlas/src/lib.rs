#![doc = include_str!("../README.md")]

pub mod codec;
pub mod global;
pub mod lookup;
mod spatial;
mod tree;
mod zone_index;

pub use lookup::{LoadError, LookupError, TimeZoneLookup, etc_gmt};
pub use spatial::{BBox, Position};
pub use tree::{TimeZoneTree, TreeNode};
pub use zone_index::{TimeZoneIndex, TimeZoneIndex2, TimeZoneIndex8};
