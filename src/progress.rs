//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to follow a run
//! through preprocessing, extraction and normalization.
//!
//! Callers can forward events to a channel, a web socket or a terminal
//! spinner; the library knows nothing about how the host reports progress.
//!
//! # Example
//!
//! ```rust
//! use edgequake_receipt2json::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     stages: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{stage} done in {elapsed_ms}ms");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { stages: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::Stage;
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as a receipt moves through the stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `run_batch` and `run_stream` drive several receipts at once through the
/// same config, so the same callback may be called concurrently. Protect
/// shared mutable state accordingly (e.g. `Mutex`, `AtomicUsize`).
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once after credentials are validated, before any I/O.
    fn on_run_start(&self, input: &Path) {
        let _ = input;
    }

    /// Called when a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called when a stage fails; the run ends right after.
    fn on_stage_error(&self, stage: Stage, error: &str) {
        let _ = (stage, error);
    }

    /// Called once after a successful run.
    ///
    /// # Arguments
    /// * `item_count` — number of normalized items returned
    fn on_run_complete(&self, item_count: usize) {
        let _ = item_count;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        items: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, _stage: Stage) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, _elapsed_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_error(&self, _stage: Stage, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_run_complete(&self, item_count: usize) {
            self.items.store(item_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(Path::new("uploads/test1.jpg"));
        cb.on_stage_start(Stage::Preprocess);
        cb.on_stage_complete(Stage::Preprocess, 12);
        cb.on_stage_error(Stage::Extract, "timeout");
        cb.on_run_complete(0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        for stage in [Stage::Preprocess, Stage::Extract] {
            tracker.on_stage_start(stage);
            tracker.on_stage_complete(stage, 5);
        }
        tracker.on_stage_start(Stage::Normalize);
        tracker.on_stage_error(Stage::Normalize, "contract violation");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);

        tracker.on_run_complete(7);
        assert_eq!(tracker.items.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Extract);
        cb.on_stage_complete(Stage::Extract, 1);
    }
}
