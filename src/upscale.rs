//! Classical resolution increase
//!
//! This is Lanczos resampling, not a learned super-resolution model. It adds
//! pixels, not detail.

use crate::{
    config::PipelineConfig,
    error::{CutoutError, Result},
    types::RasterBuffer,
};
use image::imageops::{self, FilterType};
use tracing::debug;

/// "Super resolution" only runs when the original's longer side is below this
pub const SUPER_RESOLUTION_MAX_DIMENSION: u32 = 4000;
/// "Upscale small images" only runs when the original's longer side is below this
pub const UPSCALE_SMALL_MAX_DIMENSION: u32 = 2000;
/// Scale factor of each upscale
pub const DEFAULT_FACTOR: u32 = 2;

/// Why an upscale was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleTrigger {
    SuperResolution,
    UpscaleSmall,
}

impl UpscaleTrigger {
    fn max_dimension(self) -> u32 {
        match self {
            Self::SuperResolution => SUPER_RESOLUTION_MAX_DIMENSION,
            Self::UpscaleSmall => UPSCALE_SMALL_MAX_DIMENSION,
        }
    }
}

/// Resize by an integer factor with a Lanczos3 filter, keeping the channel layout
///
/// # Errors
/// - `InvalidConfig` for a zero factor or a result that overflows `u32`
pub fn upscale(image: &RasterBuffer, factor: u32) -> Result<RasterBuffer> {
    if factor == 0 {
        return Err(CutoutError::config_value_error(
            "upscale factor",
            factor,
            ">= 1",
            Some(DEFAULT_FACTOR),
        ));
    }
    if factor == 1 {
        return Ok(image.clone());
    }

    let (width, height) = image.dimensions();
    let (new_width, new_height) = match (width.checked_mul(factor), height.checked_mul(factor)) {
        (Some(w), Some(h)) => (w, h),
        _ => {
            return Err(CutoutError::invalid_config(format!(
                "Upscaling {}x{} by {} overflows the maximum image size",
                width, height, factor
            )))
        },
    };

    debug!(width, height, new_width, new_height, "Upscaling with Lanczos3");

    Ok(match image {
        RasterBuffer::Rgb(img) => {
            RasterBuffer::Rgb(imageops::resize(img, new_width, new_height, FilterType::Lanczos3))
        },
        RasterBuffer::Rgba(img) => {
            RasterBuffer::Rgba(imageops::resize(img, new_width, new_height, FilterType::Lanczos3))
        },
    })
}

/// Triggers that fire for an original of the given size
///
/// Both may fire in the same request; each doubles the current size.
#[must_use]
pub fn planned_triggers(config: &PipelineConfig, original: (u32, u32)) -> Vec<UpscaleTrigger> {
    let longest = original.0.max(original.1);
    [
        (config.super_resolution, UpscaleTrigger::SuperResolution),
        (config.upscale_small, UpscaleTrigger::UpscaleSmall),
    ]
    .into_iter()
    .filter(|(enabled, trigger)| *enabled && longest < trigger.max_dimension())
    .map(|(_, trigger)| trigger)
    .collect()
}

/// Apply every upscale the config and original size call for
pub fn apply_configured(
    image: RasterBuffer,
    config: &PipelineConfig,
    original: (u32, u32),
) -> Result<RasterBuffer> {
    planned_triggers(config, original)
        .into_iter()
        .try_fold(image, |current, trigger| {
            debug!(?trigger, "Upscale triggered");
            upscale(&current, DEFAULT_FACTOR)
        })
}
