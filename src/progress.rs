//! Progress-callback trait for per-page pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive events as
//! the pipeline works through pages and boundary pairs.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a UI thread, or a log
//! sink without the library knowing how the host application
//! communicates. The trait is `Send + Sync` so an embedding application
//! can drive the pipeline from a background task while the callback
//! updates state shared with its interactive thread.

use std::fmt;
use std::sync::Arc;

/// Which pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Rendering pages and extracting text via the OCR service.
    Ocr,
    /// Splitting cached page text into sentence segments.
    Split,
    /// Checking and repairing cross-page sentence boundaries.
    Boundary,
    /// Re-splitting over-long segments via the discourse service.
    Resplit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ocr => "ocr",
            Stage::Split => "split",
            Stage::Boundary => "boundary",
            Stage::Resplit => "resplit",
        };
        f.write_str(name)
    }
}

/// Called by the pipeline as it processes each unit of work.
///
/// A "unit" is a page for the OCR and split stages, a page pair for the
/// boundary stage, and an input segment for the resplitter. All methods
/// have default no-op implementations so callers only override what they
/// care about. Events for one document arrive strictly in order — the
/// pipeline is sequential by design.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when a stage begins.
    ///
    /// # Arguments
    /// * `stage`       — which stage is starting
    /// * `total_units` — units the stage expects to examine (0 if unknown
    ///   up front, e.g. a cache-tree sweep)
    fn on_stage_start(&self, stage: Stage, total_units: usize) {
        let _ = (stage, total_units);
    }

    /// Called just before a unit is processed.
    fn on_unit_start(&self, stage: Stage, unit: usize, total_units: usize) {
        let _ = (stage, unit, total_units);
    }

    /// Called when a unit completes successfully.
    ///
    /// `detail_len` carries the byte length of whatever the unit produced
    /// (OCR text, segment list) for callers that track output volume.
    fn on_unit_complete(&self, stage: Stage, unit: usize, total_units: usize, detail_len: usize) {
        let _ = (stage, unit, total_units, detail_len);
    }

    /// Called when a unit fails. The stage may abort afterwards (OCR,
    /// boundary) or carry on with the next unit (split sweep).
    fn on_unit_error(&self, stage: Stage, unit: usize, total_units: usize, error: String) {
        let _ = (stage, unit, total_units, error);
    }

    /// Called once after a stage finishes, with the count of units that
    /// completed without error.
    fn on_stage_complete(&self, stage: Stage, success_count: usize) {
        let _ = (stage, success_count);
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

    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        last_stage_success: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_unit_start(&self, _stage: Stage, _unit: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _stage: Stage, _unit: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _stage: Stage, _unit: usize, _total: usize, _error: String) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage_complete(&self, _stage: Stage, success_count: usize) {
            self.last_stage_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Ocr, 5);
        cb.on_unit_start(Stage::Ocr, 1, 5);
        cb.on_unit_complete(Stage::Ocr, 1, 5, 42);
        cb.on_unit_error(Stage::Split, 2, 5, "boom".to_string());
        cb.on_stage_complete(Stage::Ocr, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            completes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            last_stage_success: AtomicUsize::new(0),
        };

        tracker.on_stage_start(Stage::Split, 3);
        tracker.on_unit_start(Stage::Split, 1, 3);
        tracker.on_unit_complete(Stage::Split, 1, 3, 100);
        tracker.on_unit_start(Stage::Split, 2, 3);
        tracker.on_unit_error(Stage::Split, 2, 3, "503 after retries".to_string());
        tracker.on_unit_start(Stage::Split, 3, 3);
        tracker.on_unit_complete(Stage::Split, 3, 3, 80);
        tracker.on_stage_complete(Stage::Split, 2);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.last_stage_success.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage_start(Stage::Boundary, 10);
        cb.on_unit_complete(Stage::Boundary, 1, 10, 512);
    }

    #[test]
    fn stage_display_names() {
        assert_eq!(Stage::Ocr.to_string(), "ocr");
        assert_eq!(Stage::Resplit.to_string(), "resplit");
    }
}
