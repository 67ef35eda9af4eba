//! Progress reporting service
//!
//! Separates progress reporting from the pipeline itself so each front-end
//! can render progress its own way.

use crate::types::{PipelineStage, StageTimings};
use instant::Instant;
use tracing::{debug, error, info};

/// Human-readable description of a pipeline stage
#[must_use]
pub fn stage_description(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Segmented => "Segmenting foreground",
        PipelineStage::MaskRefined => "Refining mask edges",
        PipelineStage::DetailEnhanced => "Enhancing details",
        PipelineStage::Upscaled => "Upscaling",
        PipelineStage::Composited => "Compositing background",
        PipelineStage::Finished => "Applying final adjustments",
        PipelineStage::Exported => "Exporting",
    }
}

/// Typical progress percentage once a stage has completed
///
/// Segmentation dominates wall-clock time, so it gets the largest share.
#[must_use]
pub fn stage_progress(stage: PipelineStage) -> u8 {
    match stage {
        PipelineStage::Segmented => 50,
        PipelineStage::MaskRefined => 70,
        PipelineStage::DetailEnhanced => 80,
        PipelineStage::Upscaled => 88,
        PipelineStage::Composited => 94,
        PipelineStage::Finished => 97,
        PipelineStage::Exported => 100,
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Stage that just completed (or was skipped)
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            stage,
            progress: stage_progress(stage),
            description: stage_description(stage).to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Receives progress from the pipeline
pub trait ProgressReporter: Send + Sync {
    /// A stage has finished (applied or skipped)
    fn report_progress(&self, update: ProgressUpdate);

    /// The whole run finished
    fn report_completion(&self, timings: &StageTimings);

    /// A stage failed and the run was aborted
    fn report_error(&self, stage: PipelineStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &StageTimings) {}

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}
}

/// Reports progress as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressReporter {
    verbose: bool,
}

impl TracingProgressReporter {
    /// `verbose` adds elapsed time and a per-stage timing breakdown
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            info!(
                stage = %update.stage,
                elapsed_ms = update.elapsed_ms,
                "[{}%] {}",
                update.progress,
                update.description
            );
        } else {
            debug!(stage = %update.stage, "[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &StageTimings) {
        info!(total_ms = timings.total_ms, "Pipeline completed");
        if self.verbose {
            info!("{}", timings.summary());
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        error!(stage = %stage, "{} failed: {}", stage_description(stage), error);
    }
}

/// Tracks elapsed time and forwards updates to a reporter
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current_stage: Option<PipelineStage>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    /// Report that `stage` completed
    pub fn report_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_completion(&self, timings: &StageTimings) {
        self.reporter.report_completion(timings);
    }

    pub fn report_error(&self, stage: PipelineStage, error: &str) {
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Last stage reported
    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Test progress reporter that captures reports for verification
    #[derive(Default)]
    struct TestProgressReporter {
        progress_updates: Arc<Mutex<Vec<ProgressUpdate>>>,
        completions: Arc<Mutex<Vec<StageTimings>>>,
        errors: Arc<Mutex<Vec<(PipelineStage, String)>>>,
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.progress_updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, timings: &StageTimings) {
            self.completions.lock().unwrap().push(timings.clone());
        }

        fn report_error(&self, stage: PipelineStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_stage_progress_is_monotonic() {
        let values: Vec<u8> = PipelineStage::ORDER.iter().map(|s| stage_progress(*s)).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(values.last(), Some(&100));
    }

    #[test]
    fn test_tracker_forwards_updates() {
        let reporter = TestProgressReporter::default();
        let mut tracker = ProgressTracker::new(&reporter);

        tracker.report_stage(PipelineStage::Segmented);
        tracker.report_stage(PipelineStage::MaskRefined);
        assert_eq!(tracker.current_stage(), Some(PipelineStage::MaskRefined));

        tracker.report_error(PipelineStage::DetailEnhanced, "boom");
        tracker.report_completion(&StageTimings::default());

        let updates = reporter.progress_updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].description, "Refining mask edges");
        assert_eq!(updates[1].progress, 70);

        let errors = reporter.errors.lock().unwrap();
        assert_eq!(errors[0], (PipelineStage::DetailEnhanced, "boom".to_string()));
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_reporters_do_not_panic() {
        for reporter in [
            &NoOpProgressReporter as &dyn ProgressReporter,
            &TracingProgressReporter::new(true),
            &TracingProgressReporter::new(false),
        ] {
            let mut tracker = ProgressTracker::new(reporter);
            tracker.report_stage(PipelineStage::Composited);
            tracker.report_error(PipelineStage::Finished, "error");
            tracker.report_completion(&StageTimings::default());
        }
    }
}
