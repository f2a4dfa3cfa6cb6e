#![doc = include_str!("../README.md")]

mod build;
mod consolidate;
mod predicates;
mod progress;
mod ring;
mod source;

pub use build::{BuildError, BuildOptions, CancelToken, build_tree};
pub use progress::{NoProgress, ProgressSink, ProgressStep};
pub use ring::{DEFAULT_MIN_RING_DISTANCE, Ring};
pub use source::{LoadError, TimeZoneSource, TimeZoneSources};

use std::io::Read;

use tzatlas::TimeZoneTree;

/// The whole pipeline: GeoJSON stream → loader → partition → consolidation.
///
/// # Errors
///
/// Load failures abort immediately; the build itself only fails on
/// cancellation.
pub fn build_from_geojson<R: Read>(
    reader: R,
    options: &BuildOptions,
    cancel: &CancelToken,
    progress: &dyn ProgressSink,
) -> Result<TimeZoneTree, BuildError> {
    let sources = TimeZoneSources::load(reader, options.min_ring_distance)?;
    #[allow(clippy::cast_possible_truncation)]
    progress.on_progress(ProgressStep::LoadSources, sources.len() as u64);
    build_tree(&sources, options, cancel, progress)
}
