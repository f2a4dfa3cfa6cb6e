//! # The frozen lookup tree
//!
//! An alternating-axis binary space partition of the world bounding box.
//! Nodes own their children outright; there are no parent pointers, and any
//! traversal that needs the cell rectangle recomputes it on the way down
//! from [`BBox::WORLD`].

use crate::spatial::BBox;
use crate::zone_index::TimeZoneIndex;

/// One node of the tree: a payload plus optional `(hi, lo)` children.
///
/// After consolidation only leaves carry meaningful payloads; internal nodes
/// are routing-only and serialize with an empty index.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    index: TimeZoneIndex,
    children: Option<Box<(TreeNode, TreeNode)>>,
}

impl TreeNode {
    pub const fn leaf(index: TimeZoneIndex) -> Self {
        Self { index, children: None }
    }

    pub fn branch(index: TimeZoneIndex, hi: Self, lo: Self) -> Self {
        Self {
            index,
            children: Some(Box::new((hi, lo))),
        }
    }

    pub fn index(&self) -> TimeZoneIndex {
        self.index
    }

    /// The `(hi, lo)` children, or `None` for a leaf.
    pub fn children(&self) -> Option<(&Self, &Self)> {
        self.children.as_deref().map(|pair| (&pair.0, &pair.1))
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn count(&self) -> u32 {
        match self.children() {
            Some((hi, lo)) => 1 + hi.count() + lo.count(),
            None => 1,
        }
    }
}

/// The complete spatial index: the root node plus the id table.
///
/// Index `i` (1-based, as stored in [`TimeZoneIndex`] slots) names
/// `time_zone_ids()[i - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeZoneTree {
    root: TreeNode,
    time_zone_ids: Vec<String>,
    node_count: u32,
}

impl TimeZoneTree {
    pub fn new(root: TreeNode, time_zone_ids: Vec<String>) -> Self {
        let node_count = root.count();
        Self {
            root,
            time_zone_ids,
            node_count,
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn time_zone_ids(&self) -> &[String] {
        &self.time_zone_ids
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Descends from the root to the leaf cell containing the coordinate.
    ///
    /// Coordinates must already be range-checked. Each split varies exactly
    /// one axis, so comparing against both components of the hi half's SW
    /// corner decides the branch without knowing the split axis.
    pub(crate) fn locate(&self, lon: f32, lat: f32) -> (&TreeNode, BBox, u8) {
        let mut node = &self.root;
        let mut bbox = BBox::WORLD;
        let mut level = 0u8;
        while let Some((hi, lo)) = node.children() {
            let (hi_box, lo_box) = bbox.split(level);
            level += 1;
            if lon >= hi_box.sw.lon && lat >= hi_box.sw.lat {
                node = hi;
                bbox = hi_box;
            } else {
                node = lo;
                bbox = lo_box;
            }
        }
        (node, bbox, level)
    }

    /// Visits the cell of every leaf whose payload matches the query.
    ///
    /// A query with an empty second slot matches any leaf containing its
    /// first index; a two-index query matches only leaves with exactly that
    /// payload.
    pub(crate) fn visit_matching<F: FnMut(BBox)>(&self, query: TimeZoneIndex, callback: &mut F) {
        Self::visit(&self.root, BBox::WORLD, 0, query, callback);
    }

    fn visit<F: FnMut(BBox)>(node: &TreeNode, bbox: BBox, level: u8, query: TimeZoneIndex, callback: &mut F) {
        match node.children() {
            Some((hi, lo)) => {
                let (hi_box, lo_box) = bbox.split(level);
                Self::visit(hi, hi_box, level + 1, query, callback);
                Self::visit(lo, lo_box, level + 1, query, callback);
            }
            None => {
                let payload = node.index();
                let matches = if query.second() == 0 {
                    payload.contains(query.first())
                } else {
                    payload == query
                };
                if matches {
                    callback(bbox);
                }
            }
        }
    }
}
