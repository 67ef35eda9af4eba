//! Boundary to the external segmentation model
//!
//! The neural network itself lives outside this crate. Anything that can turn
//! an image into a cutout and/or a confidence mask implements
//! [`SegmentationModel`]; the pipeline reconciles whatever it returns into a
//! complete [`SegmentedInput`].

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use crate::{
    config::{MattingParams, ModelVariant, PipelineConfig},
    error::{CutoutError, Result},
    types::{AlphaMask, RasterBuffer},
};
use std::path::Path;
use tracing::{debug, warn};

/// What the pipeline asks of the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationRequest {
    pub model: ModelVariant,
    /// Alpha matting parameters; `None` disables matting
    pub matting: Option<MattingParams>,
    /// Only the mask is needed; the model may skip building a cutout
    pub only_mask: bool,
}

impl SegmentationRequest {
    /// Request built from the pipeline configuration
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            model: config.model,
            matting: Some(config.matting_params()),
            only_mask: false,
        }
    }
}

/// Raw result of a segmentation call; either part may be missing
#[derive(Debug, Clone, Default)]
pub struct SegmentationOutput {
    pub cutout: Option<RasterBuffer>,
    pub mask: Option<AlphaMask>,
}

impl SegmentationOutput {
    #[must_use]
    pub fn mask_only(mask: AlphaMask) -> Self {
        Self {
            cutout: None,
            mask: Some(mask),
        }
    }

    #[must_use]
    pub fn cutout_only(cutout: RasterBuffer) -> Self {
        Self {
            cutout: Some(cutout),
            mask: None,
        }
    }

    #[must_use]
    pub fn both(cutout: RasterBuffer, mask: AlphaMask) -> Self {
        Self {
            cutout: Some(cutout),
            mask: Some(mask),
        }
    }
}

/// A segmentation model handle
///
/// Implementations must be shareable across request threads; the pipeline
/// only ever borrows the handle.
pub trait SegmentationModel: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Segment `image` into foreground and background
    ///
    /// # Errors
    /// Any failure; the pipeline reports it as `ExternalModelFailure`
    fn segment(&self, image: &RasterBuffer, request: &SegmentationRequest)
        -> Result<SegmentationOutput>;
}

/// A cutout and its mask, ready for refinement
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedInput {
    /// Image handed to the model
    pub original: RasterBuffer,
    /// Subject cut out of the original (usually RGBA)
    pub cutout: RasterBuffer,
    /// Raw model confidence mask, same size as `cutout`
    pub mask: AlphaMask,
}

impl SegmentedInput {
    /// Pair a cutout with its raw mask
    ///
    /// # Errors
    /// - `DimensionMismatch` when the mask and cutout sizes disagree
    pub fn new(original: RasterBuffer, cutout: RasterBuffer, mask: AlphaMask) -> Result<Self> {
        mask.ensure_dimensions(cutout.dimensions(), "segmentation output")?;
        Ok(Self {
            original,
            cutout,
            mask,
        })
    }

    /// Dimensions of the image the model saw
    #[must_use]
    pub fn original_dimensions(&self) -> (u32, u32) {
        self.original.dimensions()
    }
}

/// Complete a partial model output
///
/// - mask only: the cutout is the input with the mask as alpha
/// - cutout only: the mask is the cutout's alpha channel
/// - neither (or an RGB cutout without mask): `ExternalModelFailure`
pub fn reconcile(original: &RasterBuffer, output: SegmentationOutput) -> Result<SegmentedInput> {
    match (output.cutout, output.mask) {
        (Some(cutout), Some(mask)) => SegmentedInput::new(original.clone(), cutout, mask),
        (None, Some(mask)) => {
            let cutout = RasterBuffer::Rgba(mask.apply_to(original)?);
            SegmentedInput::new(original.clone(), cutout, mask)
        },
        (Some(cutout), None) => {
            let mask = cutout.alpha_mask().ok_or_else(|| {
                CutoutError::external_model("model returned an RGB cutout without a mask")
            })?;
            SegmentedInput::new(original.clone(), cutout, mask)
        },
        (None, None) => Err(CutoutError::external_model(
            "model returned neither a cutout nor a mask",
        )),
    }
}

/// Run the model and reconcile its output
///
/// Every error raised by the model is reported as `ExternalModelFailure`.
pub fn segment_with(
    model: &dyn SegmentationModel,
    image: &RasterBuffer,
    request: &SegmentationRequest,
) -> Result<SegmentedInput> {
    debug!(
        model = model.name(),
        variant = %request.model,
        width = image.width(),
        height = image.height(),
        "Running segmentation"
    );

    let output = model.segment(image, request).map_err(|e| match e {
        external @ CutoutError::ExternalModelFailure(_) => external,
        other => {
            warn!(model = model.name(), error = %other, "Segmentation model failed");
            CutoutError::external_model(format!("{}: {}", model.name(), other))
        },
    })?;

    reconcile(image, output)
}

/// Uses the input's own alpha channel as the segmentation
///
/// For inputs that were already cut out elsewhere. RGB inputs fail, since
/// there is nothing to read a mask from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistingAlphaSegmenter;

impl SegmentationModel for ExistingAlphaSegmenter {
    fn name(&self) -> &str {
        "existing-alpha"
    }

    fn segment(
        &self,
        image: &RasterBuffer,
        _request: &SegmentationRequest,
    ) -> Result<SegmentationOutput> {
        let mask = image.alpha_mask().ok_or_else(|| {
            CutoutError::external_model("input has no alpha channel to use as a mask")
        })?;
        Ok(SegmentationOutput::both(image.clone(), mask))
    }
}

/// Returns a mask produced ahead of time, e.g. loaded from disk
#[derive(Debug, Clone)]
pub struct PrecomputedMaskSegmenter {
    mask: AlphaMask,
}

impl PrecomputedMaskSegmenter {
    #[must_use]
    pub fn new(mask: AlphaMask) -> Self {
        Self { mask }
    }

    /// Load the mask from an image file (colour masks use their luma)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(AlphaMask::open(path)?))
    }

    #[must_use]
    pub fn mask(&self) -> &AlphaMask {
        &self.mask
    }
}

impl SegmentationModel for PrecomputedMaskSegmenter {
    fn name(&self) -> &str {
        "precomputed-mask"
    }

    fn segment(
        &self,
        image: &RasterBuffer,
        _request: &SegmentationRequest,
    ) -> Result<SegmentationOutput> {
        self.mask
            .ensure_dimensions(image.dimensions(), "precomputed mask")?;
        Ok(SegmentationOutput::mask_only(self.mask.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::test_utils::{MockOutputMode, MockSegmenter};
    use image::{Rgba, RgbaImage};

    fn request() -> SegmentationRequest {
        SegmentationRequest::from_config(&PipelineConfig::default())
    }

    #[test]
    fn test_request_from_config() {
        let config = PipelineConfig::builder()
            .matting_thresholds(200, 20)
            .preserve_details(false)
            .build()
            .unwrap();
        let request = SegmentationRequest::from_config(&config);
        let matting = request.matting.unwrap();
        assert_eq!(matting.foreground_threshold, 200);
        assert_eq!(matting.background_threshold, 20);
        assert!(!matting.post_process_mask);
        assert_eq!(request.model, ModelVariant::U2netHumanSeg);
    }

    #[test]
    fn test_reconcile_mask_only() {
        let original = RasterBuffer::solid_rgb(4, 3, [1, 2, 3]);
        let mask = AlphaMask::filled((4, 3), 77);
        let segmented = reconcile(&original, SegmentationOutput::mask_only(mask.clone())).unwrap();
        assert_eq!(segmented.mask, mask);
        assert_eq!(segmented.cutout.alpha_mask().unwrap(), mask);
        assert_eq!(segmented.cutout.to_rgb8(), original.to_rgb8());
    }

    #[test]
    fn test_reconcile_cutout_only() {
        let original = RasterBuffer::solid_rgb(2, 2, [1, 2, 3]);
        let cutout = RasterBuffer::Rgba(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 200])));
        let segmented = reconcile(&original, SegmentationOutput::cutout_only(cutout)).unwrap();
        assert!(segmented.mask.data.iter().all(|&v| v == 200));
    }

    #[test]
    fn test_reconcile_failures() {
        let original = RasterBuffer::solid_rgb(2, 2, [0, 0, 0]);
        let err = reconcile(&original, SegmentationOutput::default()).unwrap_err();
        assert!(matches!(err, CutoutError::ExternalModelFailure(_)));

        let rgb_cutout = SegmentationOutput::cutout_only(original.clone());
        assert!(matches!(
            reconcile(&original, rgb_cutout).unwrap_err(),
            CutoutError::ExternalModelFailure(_)
        ));

        let mismatched = SegmentationOutput::both(original.clone(), AlphaMask::filled((3, 2), 0));
        assert!(matches!(
            reconcile(&original, mismatched).unwrap_err(),
            CutoutError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_model_errors_become_external_failures() {
        let model = MockSegmenter::new_failing();
        let image = RasterBuffer::solid_rgb(8, 8, [0, 0, 0]);
        let err = segment_with(&model, &image, &request()).unwrap_err();
        assert!(matches!(err, CutoutError::ExternalModelFailure(_)));
        assert_eq!(err.status_code(), 502);
        assert_eq!(model.get_call_history(), vec!["segment:u2net_human_seg"]);
    }

    #[test]
    fn test_segment_with_mock_modes() {
        let image = RasterBuffer::solid_rgb(20, 10, [90, 90, 90]);
        for mode in [
            MockOutputMode::MaskOnly,
            MockOutputMode::CutoutOnly,
            MockOutputMode::Both,
        ] {
            let model = MockSegmenter::with_mode(mode);
            let segmented = segment_with(&model, &image, &request()).unwrap();
            assert_eq!(segmented.cutout.dimensions(), (20, 10));
            assert_eq!(segmented.mask.dimensions, (20, 10));
        }
    }

    #[test]
    fn test_existing_alpha_segmenter() {
        let image = RasterBuffer::Rgba(RgbaImage::from_pixel(3, 3, Rgba([5, 5, 5, 42])));
        let segmented = segment_with(&ExistingAlphaSegmenter, &image, &request()).unwrap();
        assert_eq!(segmented.cutout, image);
        assert_eq!(segmented.mask, AlphaMask::filled((3, 3), 42));

        let rgb = RasterBuffer::solid_rgb(3, 3, [5, 5, 5]);
        assert!(segment_with(&ExistingAlphaSegmenter, &rgb, &request()).is_err());
    }

    #[test]
    fn test_precomputed_mask_segmenter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        AlphaMask::filled((6, 4), 180).save_png(&path).unwrap();

        let model = PrecomputedMaskSegmenter::open(&path).unwrap();
        let image = RasterBuffer::solid_rgb(6, 4, [255, 0, 0]);
        let segmented = segment_with(&model, &image, &request()).unwrap();
        assert!(segmented.mask.data.iter().all(|&v| v == 180));

        let wrong_size = RasterBuffer::solid_rgb(5, 4, [255, 0, 0]);
        let err = segment_with(&model, &wrong_size, &request()).unwrap_err();
        assert!(matches!(err, CutoutError::ExternalModelFailure(_)));
    }
}
