#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Cutout Pipeline
//!
//! Post-segmentation processing for background removal: refines the
//! confidence mask a segmentation model produced, optionally enhances and
//! upscales the cutout, composites it onto a background and exports it
//! losslessly.
//!
//! The neural network is not part of this crate. Anything implementing
//! [`SegmentationModel`] can drive the pipeline; [`ExistingAlphaSegmenter`]
//! and [`PrecomputedMaskSegmenter`] cover inputs that already carry a mask.
//!
//! ## Stages
//!
//! `Segmented -> MaskRefined -> DetailEnhanced -> Upscaled -> Composited -> Finished -> Exported`
//!
//! Refinement, enhancement and upscaling only run under the `Ultra HD`
//! quality profile and their individual flags. Disabled stages are identity
//! transitions that still appear in the run's stage records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cutout_pipeline::{
//!     BackgroundSpec, CutoutPipeline, ExistingAlphaSegmenter, ExportFormat, PipelineConfig,
//!     RasterBuffer, RgbColor,
//! };
//!
//! # fn example() -> cutout_pipeline::Result<()> {
//! let image = RasterBuffer::open("cutout.png")?;
//! let config = PipelineConfig::builder()
//!     .background(BackgroundSpec::SolidColor(RgbColor::WHITE))
//!     .build()?;
//!
//! let mut output = CutoutPipeline::new().process(&image, &ExistingAlphaSegmenter, &config)?;
//! let jpeg = output.export(ExportFormat::Jpeg)?;
//! std::fs::write("result.jpg", jpeg)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line front-end, progress bars and subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//! - `tracing-files`: log files through `tracing-appender`
//! - `test-utils`: `segmentation::test_utils::MockSegmenter` for integration tests and benches

pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod composite;
pub mod config;
pub mod enhance;
pub mod error;
pub mod export;
pub mod finish;
pub mod pipeline;
pub mod refine;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod upscale;
pub mod utils;

use std::sync::Arc;
use tokio::io::AsyncRead;

pub use api::{
    handle_export_request, handle_process_request, ApiError, ErrorResponse, ExportRequest,
    ExportResponse, ProcessRequest, ProcessResponse,
};
pub use composite::BackgroundCompositor;
pub use config::{
    BackgroundSpec, GradientBlendMask, MissingAlphaPolicy, ModelVariant, PipelineConfig,
    PipelineConfigBuilder, ProcessSettings, QualityProfile, RefinementIntensity, RgbColor,
};
pub use error::{CutoutError, Result};
pub use export::{ExportArtifact, ExportFormat};
pub use pipeline::{
    CutoutPipeline, PipelineJob, PipelineOutput, PipelineState, StageRecord, StageStatus,
};
pub use refine::MaskRefiner;
pub use segmentation::{
    ExistingAlphaSegmenter, PrecomputedMaskSegmenter, SegmentationModel, SegmentationOutput,
    SegmentationRequest, SegmentedInput,
};
pub use services::{
    ImageIOService, NoOpProgressReporter, OutputFormatHandler, ProgressReporter, ProgressTracker,
    ProgressUpdate, TracingProgressReporter,
};
pub use types::{
    AlphaMask, ChannelLayout, MaskStatistics, PipelineStage, ProcessingMetadata, RasterBuffer,
    StageTimings,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};

/// Run the pipeline on encoded image bytes
///
/// Decoding and processing happen on tokio's blocking pool.
///
/// # Examples
/// ```rust,no_run
/// use cutout_pipeline::{process_bytes, ExistingAlphaSegmenter, ExportFormat, PipelineConfig};
/// use std::sync::Arc;
///
/// # async fn example(upload: Vec<u8>) -> cutout_pipeline::Result<()> {
/// let mut output =
///     process_bytes(upload, Arc::new(ExistingAlphaSegmenter), PipelineConfig::default()).await?;
/// let png = output.export(ExportFormat::Png)?;
/// # Ok(())
/// # }
/// ```
pub async fn process_bytes(
    image_bytes: Vec<u8>,
    model: Arc<dyn SegmentationModel>,
    config: PipelineConfig,
) -> Result<PipelineOutput> {
    tokio::task::spawn_blocking(move || {
        let image = ImageIOService::load_from_bytes(&image_bytes)?;
        CutoutPipeline::new().process(&image, model.as_ref(), &config)
    })
    .await
    .map_err(|e| CutoutError::internal(format!("pipeline task failed: {}", e)))?
}

/// Read an image from an async stream and run the pipeline on it
pub async fn process_reader<R: AsyncRead + Unpin>(
    reader: R,
    model: Arc<dyn SegmentationModel>,
    config: PipelineConfig,
) -> Result<PipelineOutput> {
    let image = ImageIOService::load_from_reader(reader).await?;
    CutoutPipeline::new()
        .process_concurrently(model, vec![PipelineJob { image, config }])
        .await
        .into_iter()
        .next()
        .unwrap_or_else(|| Err(CutoutError::internal("pipeline produced no result")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::test_utils::MockSegmenter;

    fn png_bytes() -> Vec<u8> {
        export::export(&RasterBuffer::solid_rgb(16, 12, [30, 60, 90]), ExportFormat::Png).unwrap()
    }

    #[tokio::test]
    async fn test_process_bytes() {
        let output = process_bytes(
            png_bytes(),
            Arc::new(MockSegmenter::new()),
            PipelineConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(output.image.dimensions(), (16, 12));
        assert!(output.image.has_alpha());
    }

    #[tokio::test]
    async fn test_process_bytes_rejects_garbage() {
        let err = process_bytes(
            b"garbage".to_vec(),
            Arc::new(MockSegmenter::new()),
            PipelineConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CutoutError::InvalidInputFormat(_)));
    }

    #[tokio::test]
    async fn test_process_reader() {
        let bytes = png_bytes();
        let config = PipelineConfig::builder()
            .background(BackgroundSpec::SolidColor(RgbColor::BLACK))
            .build()
            .unwrap();
        let output = process_reader(bytes.as_slice(), Arc::new(MockSegmenter::new()), config)
            .await
            .unwrap();
        assert_eq!(output.image.layout(), ChannelLayout::Rgb);
    }
}
