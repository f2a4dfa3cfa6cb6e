//! # Consolidation
//!
//! After the partition, internal nodes still carry payloads that duplicate
//! their children, and multi-claim cells may hold more candidates than a
//! leaf can. This pass sweeps top-down, pushing every candidate set to the
//! leaves (dropping sources whose holes swallow the cell on the way) and
//! resolving the ambiguous leaves by sampling a 5×5 grid inside the cell.
//!
//! Because the recursion hands the inherited set down the call tree, a leaf
//! can only ever sample after all of its ancestors contributed — the
//! ordering the original work queue had to enforce with deepest-first
//! priorities comes for free here.

use std::sync::PoisonError;

use dashmap::DashMap;
use tracing::warn;
use tzatlas::{BBox, Position, TimeZoneIndex, TimeZoneIndex2, TimeZoneIndex8};

use crate::build::{BuildError, BuildNode, CancelToken};
use crate::predicates::{box_ring_relation, point_in_ring};
use crate::progress::{ProgressSink, ProgressStep};
use crate::source::{TimeZoneSource, TimeZoneSources};

/// Shallow levels fork into the rayon pool; below this the subtrees are
/// small enough that sequential descent beats the join overhead.
const PARALLEL_LEVELS: u8 = 8;

struct Sweep<'a> {
    sources: &'a TimeZoneSources,
    multiples: &'a DashMap<u32, TimeZoneIndex2>,
    cancel: &'a CancelToken,
    progress: &'a dyn ProgressSink,
}

/// Runs the consolidation sweep over the whole build tree.
pub(crate) fn consolidate_tree(
    root: &mut BuildNode,
    sources: &TimeZoneSources,
    multiples: &DashMap<u32, TimeZoneIndex2>,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<(), BuildError> {
    let sweep = Sweep {
        sources,
        multiples,
        cancel,
        progress,
    };
    consolidate(&sweep, root, TimeZoneIndex8::EMPTY, BBox::WORLD, 0)
}

fn consolidate(
    sweep: &Sweep<'_>,
    node: &mut BuildNode,
    mut inherited: TimeZoneIndex8,
    bbox: BBox,
    level: u8,
) -> Result<(), BuildError> {
    if sweep.cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let payload = *node.index.get_mut().unwrap_or_else(PoisonError::into_inner);
    let overflow = sweep
        .multiples
        .get(&node.id)
        .map_or(TimeZoneIndex2::EMPTY, |entry| *entry);
    for index in payload.iter().chain(overflow.iter()) {
        let Some(source) = sweep.sources.get(index) else {
            continue;
        };
        if !excluded_by_any_ring(source, &bbox) && !inherited.add(index) {
            warn!(node = node.id, index, "inherited candidate set overflow");
        }
    }

    if let Some(children) = node.children.get_mut() {
        // The payload is resolved into the recursion below.
        *node.index.get_mut().unwrap_or_else(PoisonError::into_inner) = TimeZoneIndex::EMPTY;
        let (hi, lo) = &mut **children;
        let (hi_box, lo_box) = bbox.split(level);
        if level < PARALLEL_LEVELS {
            let (hi_result, lo_result) = rayon::join(
                || consolidate(sweep, hi, inherited, hi_box, level + 1),
                || consolidate(sweep, lo, inherited, lo_box, level + 1),
            );
            hi_result?;
            lo_result?;
        } else {
            consolidate(sweep, hi, inherited, hi_box, level + 1)?;
            consolidate(sweep, lo, inherited, lo_box, level + 1)?;
        }
    } else {
        let resolved = match inherited.len() {
            0 => TimeZoneIndex::EMPTY,
            1 => TimeZoneIndex::single(inherited.iter().next().unwrap_or(0)),
            _ => resolve_by_sampling(inherited, &bbox, sweep.sources),
        };
        *node.index.get_mut().unwrap_or_else(PoisonError::into_inner) = resolved;
        sweep.progress.on_progress(ProgressStep::Consolidate, 1);
    }
    Ok(())
}

/// Whether the cell sits wholly inside one of the source's holes.
fn excluded_by_any_ring(source: &TimeZoneSource, bbox: &BBox) -> bool {
    source
        .excluded
        .iter()
        .any(|ring| box_ring_relation(ring, bbox).subset)
}

/// Whether the source actually covers the point: inside some included ring
/// and outside every excluded one.
fn covers(source: &TimeZoneSource, point: Position) -> bool {
    source.included.iter().any(|ring| point_in_ring(ring, point))
        && !source.excluded.iter().any(|ring| point_in_ring(ring, point))
}

/// Resolves a multi-candidate leaf by majority over a 5×5 sample grid.
///
/// The grid starts 10% inside the cell and steps by 20%, so no probe lands
/// on a cell edge. Each probe accumulates the candidates covering it (at
/// most two, in candidate order); the most frequent accumulator wins, ties
/// going to the group seen first in probe order, and the winner is
/// normalized to ascending slot order.
fn resolve_by_sampling(
    candidates: TimeZoneIndex8,
    bbox: &BBox,
    sources: &TimeZoneSources,
) -> TimeZoneIndex {
    let mut accumulators = [TimeZoneIndex::EMPTY; 25];
    let mut slot = 0;
    for ky in 0..5u8 {
        for kx in 0..5u8 {
            let point = bbox.lerp(0.1 + f32::from(kx) / 5.0, 0.1 + f32::from(ky) / 5.0);
            let accumulator = &mut accumulators[slot];
            slot += 1;
            for index in candidates.iter() {
                let Some(source) = sources.get(index) else {
                    continue;
                };
                if covers(source, point) {
                    accumulator.add(index);
                }
            }
        }
    }

    let mut groups: Vec<(TimeZoneIndex, u32)> = Vec::new();
    for accumulator in accumulators {
        match groups.iter_mut().find(|(value, _)| *value == accumulator) {
            Some((_, count)) => *count += 1,
            None => groups.push((accumulator, 1)),
        }
    }
    let mut winner = (TimeZoneIndex::EMPTY, 0);
    for (value, count) in groups {
        if count > winner.1 {
            winner = (value, count);
        }
    }
    winner.0.normalized()
}
