//! # The parallel tree builder
//!
//! Partitions the world into cells whose payloads are the time zones whose
//! included rings cover them. Work is distributed over rings; a single
//! ring's recursion is depth-first and touches disjoint subtrees after the
//! first split, so a lock per node payload plus idempotent child creation is
//! all the synchronization the tree needs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use dashmap::DashMap;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};
use tzatlas::{BBox, TimeZoneIndex, TimeZoneIndex2, TimeZoneTree, TreeNode};

use crate::consolidate;
use crate::predicates::box_ring_relation;
use crate::progress::{ProgressSink, ProgressStep};
use crate::ring::{DEFAULT_MIN_RING_DISTANCE, Ring};
use crate::source::{LoadError, TimeZoneSources};

/// Knobs for the build pipeline.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Deepest subdivision level. Cells at the default of 25 are roughly
    /// 100 m across at mid latitudes, i.e. a 5-character geohash.
    pub max_level: u8,
    /// Reducer threshold in meters; see [`DEFAULT_MIN_RING_DISTANCE`].
    pub min_ring_distance: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_level: 25,
            min_ring_distance: DEFAULT_MIN_RING_DISTANCE,
        }
    }
}

/// Cooperative cancellation shared between the driver and the workers.
///
/// Workers observe the token at the top of every work item; geometric
/// predicates themselves run to completion, so cancellation latency is one
/// ring-times-subtree step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("cannot build a tree from zero sources")]
    NoSources,
    #[error("the build was cancelled")]
    Cancelled,
}

/// A tree node during the build: payload behind a mutex, children created
/// exactly once. The node id keys the overflow side table.
pub(crate) struct BuildNode {
    pub(crate) id: u32,
    pub(crate) index: Mutex<TimeZoneIndex>,
    pub(crate) children: OnceLock<Box<(BuildNode, BuildNode)>>,
}

impl BuildNode {
    fn new(id: u32, index: TimeZoneIndex) -> Self {
        Self {
            id,
            index: Mutex::new(index),
            children: OnceLock::new(),
        }
    }
}

pub(crate) struct Partitioner<'a> {
    sources: &'a TimeZoneSources,
    max_level: u8,
    pub(crate) root: BuildNode,
    node_counter: AtomicU32,
    pub(crate) multiples: DashMap<u32, TimeZoneIndex2>,
}

impl<'a> Partitioner<'a> {
    pub(crate) fn new(sources: &'a TimeZoneSources, max_level: u8) -> Self {
        Self {
            sources,
            max_level,
            root: BuildNode::new(0, TimeZoneIndex::EMPTY),
            node_counter: AtomicU32::new(1),
            multiples: DashMap::new(),
        }
    }

    pub(crate) fn node_count(&self) -> u32 {
        self.node_counter.load(Ordering::Relaxed)
    }

    /// Runs every (source, included ring) work item across the rayon pool.
    /// Items are queued in source-index order so progress clusters by zone.
    pub(crate) fn run(
        &self,
        cancel: &CancelToken,
        progress: &dyn ProgressSink,
    ) -> Result<(), BuildError> {
        let work: Vec<(u16, &Ring)> = self
            .sources
            .iter()
            .flat_map(|source| source.included.iter().map(move |ring| (source.index, ring)))
            .collect();

        work.par_iter().try_for_each(|&(index, ring)| {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            self.add(&self.root, index, ring, BBox::WORLD, 0);
            progress.on_progress(ProgressStep::BuildTree, 1);
            Ok(())
        })
    }

    fn add(&self, node: &BuildNode, index: u16, ring: &Ring, bbox: BBox, level: u8) {
        let relation = box_ring_relation(ring, &bbox);
        if relation.subset {
            // The ring fully contains the cell: it belongs to this zone.
            self.claim(node, index);
        } else if relation.overlapping {
            if level == self.max_level {
                // Forced leaf: partial overlap recorded as coverage, an
                // imprecision bounded by the cell size.
                self.claim(node, index);
            } else {
                let children = self.ensure_children(node);
                let (hi_box, lo_box) = bbox.split(level);
                self.add(&children.0, index, ring, hi_box, level + 1);
                self.add(&children.1, index, ring, lo_box, level + 1);
            }
        }
        // Disjoint: nothing to record.
    }

    fn claim(&self, node: &BuildNode, index: u16) {
        let mut payload = node.index.lock().unwrap_or_else(PoisonError::into_inner);
        if !payload.add(index) {
            drop(payload);
            let mut entry = self.multiples.entry(node.id).or_default();
            if !entry.add(index) {
                // Four overlapping zones in one cell would be new data.
                warn!(node = node.id, index, "overflow candidate dropped");
            }
        }
    }

    /// Idempotent: the first caller creates both children seeded with a
    /// snapshot of the parent payload, everyone else reuses them. A claim
    /// racing past the snapshot is re-applied to the children by the
    /// consolidation sweep, which pushes every ancestor payload down.
    fn ensure_children<'b>(&self, node: &'b BuildNode) -> &'b (BuildNode, BuildNode) {
        node.children.get_or_init(|| {
            let snapshot = *node.index.lock().unwrap_or_else(PoisonError::into_inner);
            let hi = self.node_counter.fetch_add(1, Ordering::Relaxed);
            let lo = self.node_counter.fetch_add(1, Ordering::Relaxed);
            Box::new((BuildNode::new(hi, snapshot), BuildNode::new(lo, snapshot)))
        })
    }
}

/// Converts the finished build tree into the immutable node representation.
pub(crate) fn freeze(node: BuildNode) -> TreeNode {
    let index = node.index.into_inner().unwrap_or_else(PoisonError::into_inner);
    match node.children.into_inner() {
        Some(children) => {
            let (hi, lo) = *children;
            TreeNode::branch(index, freeze(hi), freeze(lo))
        }
        None => TreeNode::leaf(index),
    }
}

/// Builds, consolidates, and freezes a tree from loaded sources.
///
/// # Errors
///
/// `NoSources` for an empty table, `Cancelled` when the token trips; the
/// build itself does not fail otherwise.
pub fn build_tree(
    sources: &TimeZoneSources,
    options: &BuildOptions,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<TimeZoneTree, BuildError> {
    if sources.is_empty() {
        return Err(BuildError::NoSources);
    }

    info!(zones = sources.len(), max_level = options.max_level, "partitioning");
    let partitioner = Partitioner::new(sources, options.max_level);
    partitioner.run(cancel, progress)?;
    debug!(nodes = partitioner.node_count(), "partition complete");

    let Partitioner { mut root, multiples, .. } = partitioner;
    consolidate::consolidate_tree(&mut root, sources, &multiples, cancel, progress)?;
    drop(multiples);

    let tree = TimeZoneTree::new(freeze(root), sources.ids());
    info!(nodes = tree.node_count(), "tree ready");
    Ok(tree)
}
