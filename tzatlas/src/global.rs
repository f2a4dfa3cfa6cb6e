//! # Process-wide lookup facade
//!
//! Most applications want exactly one tree for the lifetime of the process.
//! This module owns that singleton: configure a data source before first
//! use, then every caller shares the same lazily-loaded handle. Hosts that
//! need several independent trees should construct [`LookupConfig`] (or
//! [`TimeZoneLookup`]) instances directly instead.

use std::io::Read;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::debug;

use crate::codec::DATA_FILE_NAME;
use crate::lookup::{LoadError, TimeZoneLookup};

/// Builds one immutable [`TimeZoneLookup`] from a configured data source.
///
/// With neither a path nor a stream configured, [`build`] looks for
/// [`DATA_FILE_NAME`] next to the running executable.
///
/// [`build`]: LookupConfig::build
#[derive(Default)]
pub struct LookupConfig {
    data_path: Option<PathBuf>,
    data_stream: Option<Box<dyn Read + Send>>,
}

impl LookupConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the tree from a file at `path`.
    #[must_use]
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    /// Reads the tree from an open stream, e.g. embedded bytes. A configured
    /// stream takes precedence over a path and is consumed by the load.
    #[must_use]
    pub fn data_stream(mut self, stream: impl Read + Send + 'static) -> Self {
        self.data_stream = Some(Box::new(stream));
        self
    }

    /// Consumes the configuration and loads the tree.
    ///
    /// # Errors
    ///
    /// `NotReadable` when the source cannot be opened, or any decode error.
    pub fn build(mut self) -> Result<TimeZoneLookup, LoadError> {
        if let Some(stream) = self.data_stream.take() {
            TimeZoneLookup::from_reader(stream)
        } else if let Some(path) = self.data_path.take() {
            TimeZoneLookup::from_path(path)
        } else {
            TimeZoneLookup::from_path(default_data_path()?)
        }
    }
}

static GLOBAL: OnceLock<TimeZoneLookup> = OnceLock::new();
static PENDING: Mutex<LookupConfig> = Mutex::new(LookupConfig {
    data_path: None,
    data_stream: None,
});

/// Configures the file the singleton loads from.
///
/// # Errors
///
/// `AlreadyLoaded` once the singleton is materialized; the existing tree is
/// untouched.
pub fn set_data_path(path: impl Into<PathBuf>) -> Result<(), LoadError> {
    let mut pending = lock_pending()?;
    pending.data_path = Some(path.into());
    Ok(())
}

/// Configures the stream the singleton loads from; takes precedence over a
/// configured path and is consumed (and dropped) by the load.
///
/// # Errors
///
/// `AlreadyLoaded` once the singleton is materialized.
pub fn set_data_stream(stream: impl Read + Send + 'static) -> Result<(), LoadError> {
    let mut pending = lock_pending()?;
    pending.data_stream = Some(Box::new(stream));
    Ok(())
}

pub fn is_loaded() -> bool {
    GLOBAL.get().is_some()
}

/// Returns the singleton, loading it on the first call.
///
/// Loading happens at most once: concurrent first-callers block until the
/// winner finishes and then observe the identical tree. A failed load leaves
/// the configuration in place (minus any consumed stream) so a later call
/// can retry.
///
/// # Errors
///
/// Whatever [`LookupConfig::build`] reports for the configured source.
pub fn ensure_loaded() -> Result<&'static TimeZoneLookup, LoadError> {
    if let Some(lookup) = GLOBAL.get() {
        return Ok(lookup);
    }
    let mut pending = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
    // Lost the race: someone loaded while we waited for the lock.
    if let Some(lookup) = GLOBAL.get() {
        return Ok(lookup);
    }

    debug!("loading the process-wide time zone tree");
    let lookup = if let Some(stream) = pending.data_stream.take() {
        TimeZoneLookup::from_reader(stream)?
    } else if let Some(path) = &pending.data_path {
        TimeZoneLookup::from_path(path)?
    } else {
        TimeZoneLookup::from_path(default_data_path()?)?
    };
    debug!(
        zones = lookup.tree().time_zone_ids().len(),
        nodes = lookup.tree().node_count(),
        "time zone tree ready"
    );
    Ok(GLOBAL.get_or_init(|| lookup))
}

fn lock_pending() -> Result<std::sync::MutexGuard<'static, LookupConfig>, LoadError> {
    if GLOBAL.get().is_some() {
        return Err(LoadError::AlreadyLoaded);
    }
    let pending = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
    // Re-check: a load may have completed while we waited for the lock.
    if GLOBAL.get().is_some() {
        return Err(LoadError::AlreadyLoaded);
    }
    Ok(pending)
}

fn default_data_path() -> Result<PathBuf, LoadError> {
    let exe = std::env::current_exe().map_err(|source| LoadError::NotReadable {
        path: PathBuf::from(DATA_FILE_NAME),
        source,
    })?;
    Ok(exe.with_file_name(DATA_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::tree::{TimeZoneTree, TreeNode};
    use crate::zone_index::TimeZoneIndex;
    use std::io::Cursor;

    // The singleton is process-wide, so the whole lifecycle lives in one
    // test: configure, race the first load, then verify the setters freeze.
    #[test]
    fn lifecycle_of_the_process_wide_singleton() {
        let tree = TimeZoneTree::new(
            TreeNode::branch(
                TimeZoneIndex::EMPTY,
                TreeNode::leaf(TimeZoneIndex::single(1)),
                TreeNode::leaf(TimeZoneIndex::EMPTY),
            ),
            vec!["Atlantic/Azores".to_owned()],
        );
        let mut bytes = Vec::new();
        codec::serialize(&tree, &mut bytes).expect("serialization should succeed");

        assert!(!is_loaded());
        set_data_stream(Cursor::new(bytes)).expect("setter should work before load");

        let loaded: Vec<&'static TimeZoneLookup> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| ensure_loaded().expect("load should succeed")))
                .collect();
            handles.into_iter().map(|h| h.join().expect("no panics")).collect()
        });
        for lookup in &loaded {
            assert!(
                std::ptr::eq(*lookup, loaded[0]),
                "all first-callers must observe the identical tree"
            );
        }
        assert!(is_loaded());
        assert_eq!(loaded[0].id_at(10.0, 0.0).expect("query"), "Atlantic/Azores");

        assert!(matches!(set_data_path("elsewhere.bin"), Err(LoadError::AlreadyLoaded)));
        assert!(matches!(
            set_data_stream(Cursor::new(Vec::new())),
            Err(LoadError::AlreadyLoaded)
        ));
    }
}
