//! Training-phase observation.
//!
//! Quantizer training is phased (clustering, codebook updates, encoding
//! sweeps) and long-running. Rather than a process-wide timer, callers inject
//! an observer into `train_with_observer`; the default [`NoopObserver`] makes
//! plain `train` free of any bookkeeping.

use std::time::{Duration, Instant};

/// Receives phase boundaries during training.
pub trait TrainingObserver: Sync {
    /// A named phase begins.
    fn phase_started(&self, _phase: &str) {}

    /// A named phase finished after `elapsed`.
    fn phase_finished(&self, _phase: &str, _elapsed: Duration) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {}

/// Scope guard reporting one phase to an observer.
pub(crate) struct Phase<'a> {
    observer: &'a dyn TrainingObserver,
    name: &'static str,
    start: Instant,
}

impl<'a> Phase<'a> {
    pub(crate) fn enter(observer: &'a dyn TrainingObserver, name: &'static str) -> Self {
        observer.phase_started(name);
        Self {
            observer,
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for Phase<'_> {
    fn drop(&mut self) {
        self.observer.phase_finished(self.name, self.start.elapsed());
    }
}
