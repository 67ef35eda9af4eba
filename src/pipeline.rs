//! Pipeline orchestration
//!
//! [`CutoutPipeline`] sequences the stages
//! `Segmented -> MaskRefined -> DetailEnhanced -> Upscaled -> Composited -> Finished -> Exported`.
//! Optional stages are gated by the [`PipelineConfig`] flags and the quality
//! profile; a disabled stage is an identity transition that is still recorded.
//! The first failing stage aborts the run with `StageFailure`; no partial
//! output is returned and there are no retries.

use crate::{
    composite::BackgroundCompositor,
    config::PipelineConfig,
    enhance::enhance,
    error::{CutoutError, Result},
    export::{self, ExportFormat},
    finish::finish,
    refine::MaskRefiner,
    segmentation::{segment_with, SegmentationModel, SegmentationRequest, SegmentedInput},
    services::{NoOpProgressReporter, ProgressReporter, ProgressTracker},
    types::{PipelineStage, ProcessingMetadata, RasterBuffer, StageTimings},
    upscale,
};
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, span, warn, Level};

/// Whether a stage changed the image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Applied,
    /// Identity transition, with the reason it was skipped
    Skipped(String),
}

/// One stage's outcome within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub elapsed_ms: u64,
}

impl StageRecord {
    #[must_use]
    pub fn was_applied(&self) -> bool {
        self.status == StageStatus::Applied
    }
}

/// Position of a run in the stage state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// The named stage has completed
    Running(PipelineStage),
    /// Terminal: bytes were produced
    Exported,
    /// Terminal: the named stage failed
    Failed { stage: PipelineStage, reason: String },
}

impl PipelineState {
    /// A run begins once segmentation output exists
    #[must_use]
    pub fn start() -> Self {
        Self::Running(PipelineStage::Segmented)
    }

    /// The stage the next `advance` moves to
    #[must_use]
    pub fn next_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Running(stage) => stage.next(),
            Self::Exported | Self::Failed { .. } => None,
        }
    }

    /// Move to the next stage in the fixed order
    ///
    /// # Errors
    /// - `Internal` when called on a terminal state
    pub fn advance(&self) -> Result<Self> {
        match self.next_stage() {
            Some(PipelineStage::Exported) => Ok(Self::Exported),
            Some(stage) => Ok(Self::Running(stage)),
            None => Err(CutoutError::internal(format!(
                "cannot advance from terminal state {:?}",
                self
            ))),
        }
    }

    /// Terminal failure at the stage that was being attempted
    #[must_use]
    pub fn fail(&self, reason: impl Into<String>) -> Self {
        let stage = self.next_stage().unwrap_or(PipelineStage::Exported);
        Self::Failed {
            stage,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running(_))
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Final buffer (RGBA for transparent backgrounds, RGB otherwise)
    pub image: RasterBuffer,
    /// Every stage in order, applied or skipped
    pub stages: Vec<StageRecord>,
    pub timings: StageTimings,
    pub metadata: ProcessingMetadata,
    pub state: PipelineState,
}

impl PipelineOutput {
    /// Stages that changed the image
    #[must_use]
    pub fn applied_stages(&self) -> Vec<PipelineStage> {
        self.stages
            .iter()
            .filter(|r| r.was_applied())
            .map(|r| r.stage)
            .collect()
    }

    #[must_use]
    pub fn record(&self, stage: PipelineStage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Run the terminal export stage
    ///
    /// # Errors
    /// - `StageFailure` at `Exported` when encoding fails
    /// - `Internal` when the run was already exported
    pub fn export(&mut self, format: ExportFormat) -> Result<Vec<u8>> {
        let next = self.state.advance()?;
        let _span = span!(Level::DEBUG, "export", format = format.name()).entered();
        let start = Instant::now();

        match export::export(&self.image, format) {
            Ok(bytes) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.timings.record(PipelineStage::Exported, elapsed_ms);
                self.metadata.timings = self.timings.clone();
                self.stages.push(StageRecord {
                    stage: PipelineStage::Exported,
                    status: StageStatus::Applied,
                    elapsed_ms,
                });
                self.state = next;
                Ok(bytes)
            },
            Err(e) => {
                self.state = self.state.fail(e.to_string());
                Err(CutoutError::stage_failure(PipelineStage::Exported, e))
            },
        }
    }
}

/// One unit of work for [`CutoutPipeline::process_concurrently`]
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub image: RasterBuffer,
    pub config: PipelineConfig,
}

/// Stage sequencer shared by every front-end
///
/// Holds no per-request state; clones share the progress reporter.
#[derive(Clone)]
pub struct CutoutPipeline {
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for CutoutPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CutoutPipeline").finish_non_exhaustive()
    }
}

impl Default for CutoutPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates stage records and timings for one run
struct RunLog<'a> {
    tracker: ProgressTracker<'a>,
    state: PipelineState,
    stages: Vec<StageRecord>,
    timings: StageTimings,
}

impl<'a> RunLog<'a> {
    fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            tracker: ProgressTracker::new(reporter),
            state: PipelineState::start(),
            stages: Vec::with_capacity(PipelineStage::ORDER.len()),
            timings: StageTimings::default(),
        }
    }

    fn push(&mut self, stage: PipelineStage, status: StageStatus, elapsed_ms: u64) {
        if let StageStatus::Skipped(reason) = &status {
            debug!(stage = %stage, reason = %reason, "Stage skipped");
        }
        self.timings.record(stage, elapsed_ms);
        self.stages.push(StageRecord {
            stage,
            status,
            elapsed_ms,
        });
        self.tracker.report_stage(stage);
    }

    /// Record a completed stage and advance the state machine
    fn complete(&mut self, stage: PipelineStage, status: StageStatus, elapsed_ms: u64) -> Result<()> {
        self.state = self.state.advance()?;
        self.push(stage, status, elapsed_ms);
        Ok(())
    }

    fn skip(&mut self, stage: PipelineStage, reason: &str) -> Result<()> {
        self.complete(stage, StageStatus::Skipped(reason.to_string()), 0)
    }

    fn fail(&mut self, stage: PipelineStage, error: CutoutError) -> CutoutError {
        self.state = self.state.fail(error.to_string());
        self.tracker.report_error(stage, &error.to_string());
        warn!(stage = %stage, error = %error, "Pipeline stage failed");
        CutoutError::stage_failure(stage, error)
    }

    /// Run a stage body, timing it and wrapping failures
    fn run_stage<F>(&mut self, stage: PipelineStage, body: F) -> Result<RasterBuffer>
    where
        F: FnOnce() -> Result<RasterBuffer>,
    {
        let start = Instant::now();
        match body() {
            Ok(image) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                self.complete(stage, StageStatus::Applied, elapsed_ms)?;
                Ok(image)
            },
            Err(e) => Err(self.fail(stage, e)),
        }
    }
}

impl CutoutPipeline {
    /// Pipeline without progress reporting
    #[must_use]
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(NoOpProgressReporter))
    }

    #[must_use]
    pub fn with_reporter(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self { reporter }
    }

    /// Segment `image` with `model`, then run every stage
    ///
    /// # Errors
    /// - `InvalidConfig` when the configuration fails validation
    /// - `StageFailure` naming the first stage that failed
    #[instrument(
        skip(self, image, model, config),
        fields(
            model = %model.name(),
            quality = %config.quality,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process(
        &self,
        image: &RasterBuffer,
        model: &dyn SegmentationModel,
        config: &PipelineConfig,
    ) -> Result<PipelineOutput> {
        config.validate()?;
        let total_start = Instant::now();
        info!(layout = %image.layout(), "Starting cutout pipeline");

        let segmentation_start = Instant::now();
        let segmented = {
            let _span = span!(
                Level::INFO,
                "segmentation",
                model = %model.name(),
                variant = %config.model
            )
            .entered();
            let request = SegmentationRequest::from_config(config);
            segment_with(model, image, &request).map_err(|e| {
                self.reporter.report_error(PipelineStage::Segmented, &e.to_string());
                CutoutError::stage_failure(PipelineStage::Segmented, e)
            })?
        };
        let segmentation_ms = segmentation_start.elapsed().as_millis() as u64;

        self.run_stages(
            segmented,
            config,
            StageRecord {
                stage: PipelineStage::Segmented,
                status: StageStatus::Applied,
                elapsed_ms: segmentation_ms,
            },
            total_start,
        )
    }

    /// Run every stage after segmentation on an already segmented pair
    ///
    /// # Errors
    /// - `InvalidConfig` when the configuration fails validation
    /// - `StageFailure` naming the first stage that failed
    #[instrument(
        skip(self, input, config),
        fields(
            quality = %config.quality,
            dimensions = %format!("{}x{}", input.cutout.width(), input.cutout.height())
        )
    )]
    pub fn run(&self, input: SegmentedInput, config: &PipelineConfig) -> Result<PipelineOutput> {
        config.validate()?;
        let total_start = Instant::now();
        self.run_stages(
            input,
            config,
            StageRecord {
                stage: PipelineStage::Segmented,
                status: StageStatus::Skipped("segmentation supplied by caller".to_string()),
                elapsed_ms: 0,
            },
            total_start,
        )
    }

    fn run_stages(
        &self,
        input: SegmentedInput,
        config: &PipelineConfig,
        segmentation: StageRecord,
        total_start: Instant,
    ) -> Result<PipelineOutput> {
        let original_dimensions = input.original_dimensions();
        let full_refinement = config.quality.runs_full_refinement();
        let mut log = RunLog::new(self.reporter.as_ref());
        log.push(segmentation.stage, segmentation.status, segmentation.elapsed_ms);

        let SegmentedInput { cutout, mask, .. } = input;

        // Mask refinement
        let current = if !full_refinement {
            log.skip(PipelineStage::MaskRefined, "quality profile uses raw cutout")?;
            cutout
        } else if !config.edge_refinement {
            log.skip(PipelineStage::MaskRefined, "edge refinement disabled")?;
            cutout
        } else {
            let intensity = config.effective_intensity();
            let _span = span!(
                Level::DEBUG,
                "mask_refinement",
                width = %cutout.width(),
                height = %cutout.height(),
                intensity = ?intensity
            )
            .entered();
            let refiner = MaskRefiner::new(config, intensity);
            log.run_stage(PipelineStage::MaskRefined, || refiner.refine(&cutout, &mask))?
        };

        // Detail enhancement
        let current = if !full_refinement {
            log.skip(PipelineStage::DetailEnhanced, "quality profile uses raw cutout")?;
            current
        } else if !config.enhance_details {
            log.skip(PipelineStage::DetailEnhanced, "detail enhancement disabled")?;
            current
        } else {
            let _span = span!(
                Level::DEBUG,
                "detail_enhancement",
                sharpness = %config.sharpness_boost
            )
            .entered();
            log.run_stage(PipelineStage::DetailEnhanced, || {
                enhance(&current, config.sharpness_boost)
            })?
        };

        // Upscaling
        let triggers = upscale::planned_triggers(config, original_dimensions);
        let current = if !full_refinement {
            log.skip(PipelineStage::Upscaled, "quality profile uses raw cutout")?;
            current
        } else if triggers.is_empty() {
            log.skip(PipelineStage::Upscaled, "no upscale requested for this size")?;
            current
        } else {
            let _span = span!(Level::DEBUG, "upscaling", passes = triggers.len()).entered();
            log.run_stage(PipelineStage::Upscaled, || {
                upscale::apply_configured(current, config, original_dimensions)
            })?
        };

        // Compositing
        let current = if config.background.is_transparent() {
            log.skip(PipelineStage::Composited, "transparent background")?;
            current
        } else {
            let _span = span!(
                Level::DEBUG,
                "compositing",
                background = config.background.kind()
            )
            .entered();
            let compositor = BackgroundCompositor::from_config(config);
            log.run_stage(PipelineStage::Composited, || {
                compositor.composite(&current, &config.background)
            })?
        };

        // Finishing
        let neutral_contrast = (config.contrast_boost - 1.0).abs() <= f32::EPSILON;
        let current = if neutral_contrast && config.sharpness_boost <= 0.0 {
            log.skip(PipelineStage::Finished, "neutral contrast and sharpness")?;
            current
        } else {
            let _span = span!(
                Level::DEBUG,
                "finishing",
                contrast = %config.contrast_boost,
                sharpness = %config.sharpness_boost
            )
            .entered();
            log.run_stage(PipelineStage::Finished, || {
                finish(&current, config.contrast_boost, config.sharpness_boost)
            })?
        };

        let mut timings = log.timings;
        timings.total_ms = total_start.elapsed().as_millis() as u64;
        log.tracker.report_completion(&timings);

        let mut metadata = ProcessingMetadata::new(config.quality.to_string(), original_dimensions);
        metadata.output_dimensions = current.dimensions();
        metadata.output_layout = current.layout();
        metadata.timings = timings.clone();

        info!(
            output = %format!("{}x{}", metadata.output_dimensions.0, metadata.output_dimensions.1),
            layout = %metadata.output_layout,
            total_ms = timings.total_ms,
            "Cutout pipeline completed"
        );

        Ok(PipelineOutput {
            image: current,
            stages: log.stages,
            timings,
            metadata,
            state: log.state,
        })
    }

    /// Run many requests on the blocking thread pool
    ///
    /// Each job owns its buffers; only the model handle is shared. Results
    /// come back in input order.
    pub async fn process_concurrently(
        &self,
        model: Arc<dyn SegmentationModel>,
        jobs: Vec<PipelineJob>,
    ) -> Vec<Result<PipelineOutput>> {
        debug!(jobs = jobs.len(), "Dispatching concurrent pipeline runs");
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let pipeline = self.clone();
                let model = Arc::clone(&model);
                tokio::task::spawn_blocking(move || {
                    pipeline.process(&job.image, model.as_ref(), &job.config)
                })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(CutoutError::internal(format!("pipeline task failed: {}", e)))
                })
            })
            .collect()
    }
}
