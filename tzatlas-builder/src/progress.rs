//! Progress observation for the long-running build phases.

/// The build phases, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStep {
    LoadSources,
    BuildTree,
    Consolidate,
}

/// Observer notified with work-item deltas as the build advances.
///
/// Implementations are called from worker threads and must be cheap; a
/// typical host accumulates the deltas into a progress bar.
pub trait ProgressSink: Sync {
    fn on_progress(&self, step: ProgressStep, delta: u64);
}

/// The default sink: ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _step: ProgressStep, _delta: u64) {}
}
