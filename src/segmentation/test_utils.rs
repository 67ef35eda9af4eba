//! Mock segmentation models for testing the pipeline
//!
//! These stand in for the external neural network so the pipeline can be
//! exercised without model files.

use crate::{
    error::{CutoutError, Result},
    segmentation::{SegmentationModel, SegmentationOutput, SegmentationRequest},
    types::{AlphaMask, RasterBuffer},
};
use std::sync::{Arc, Mutex};

/// Which parts of the output the mock returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutputMode {
    MaskOnly,
    CutoutOnly,
    Both,
    Nothing,
}

/// Mock segmentation model producing a soft-edged centred disc
#[derive(Debug, Clone)]
pub struct MockSegmenter {
    mode: MockOutputMode,
    /// Fixed mask to return instead of the generated disc
    fixed_mask: Option<AlphaMask>,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    /// Whether to simulate a model failure
    should_fail: bool,
}

impl MockSegmenter {
    /// Mock returning both a cutout and a mask
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(MockOutputMode::Both)
    }

    #[must_use]
    pub fn with_mode(mode: MockOutputMode) -> Self {
        Self {
            mode,
            fixed_mask: None,
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    /// Mock that always returns `mask` (as a mask-only output)
    #[must_use]
    pub fn with_mask(mask: AlphaMask) -> Self {
        let mut model = Self::with_mode(MockOutputMode::MaskOnly);
        model.fixed_mask = Some(mask);
        model
    }

    /// Create a mock that fails every call
    #[must_use]
    pub fn new_failing() -> Self {
        let mut model = Self::new();
        model.should_fail = true;
        model
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Clear the call history
    pub fn clear_call_history(&self) {
        if let Ok(mut history) = self.call_history.lock() {
            history.clear();
        }
    }

    fn record_call(&self, entry: String) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(entry);
        }
    }

    /// Disc of radius one third of the shorter side with a linear falloff
    fn generate_mask(dimensions: (u32, u32)) -> AlphaMask {
        let (width, height) = dimensions;
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = (width.min(height) as f32 / 3.0).max(1.0);
        let soft_band = (radius * 0.2).max(1.0);

        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let dx = x as f32 + 0.5 - center_x;
                let dy = y as f32 + 0.5 - center_y;
                let distance = (dx * dx + dy * dy).sqrt();
                let value = ((radius - distance) / soft_band).clamp(0.0, 1.0);
                data.push((value * 255.0).round() as u8);
            }
        }
        AlphaMask::new(data, dimensions)
    }
}

impl Default for MockSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentationModel for MockSegmenter {
    fn name(&self) -> &str {
        "mock"
    }

    fn segment(
        &self,
        image: &RasterBuffer,
        request: &SegmentationRequest,
    ) -> Result<SegmentationOutput> {
        self.record_call(format!("segment:{}", request.model.identifier()));

        if self.should_fail {
            return Err(CutoutError::internal("Mock segmentation inference failed"));
        }

        let mask = match &self.fixed_mask {
            Some(mask) => mask.clone(),
            None => Self::generate_mask(image.dimensions()),
        };

        Ok(match self.mode {
            MockOutputMode::MaskOnly => SegmentationOutput::mask_only(mask),
            MockOutputMode::CutoutOnly => {
                SegmentationOutput::cutout_only(RasterBuffer::Rgba(mask.apply_to(image)?))
            },
            MockOutputMode::Both => {
                let cutout = RasterBuffer::Rgba(mask.apply_to(image)?);
                SegmentationOutput::both(cutout, mask)
            },
            MockOutputMode::Nothing => SegmentationOutput::default(),
        })
    }
}
