//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliGradientBlend, CliIntensity, CliOutputFormat};
use crate::{
    config::{
        BackgroundSpec, GradientBlendMask, MissingAlphaPolicy, PipelineConfig,
        PipelineConfigBuilder, ProcessSettings, RefinementIntensity, RgbColor,
    },
    export::ExportFormat,
    segmentation::{ExistingAlphaSegmenter, PrecomputedMaskSegmenter, SegmentationModel},
    types::RasterBuffer,
};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Convert CLI arguments to a `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration
    ///
    /// A `--settings` file supplies the base; flags given on the command line
    /// override it.
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.settings {
            Some(path) => Self::load_settings(path)?,
            None => PipelineConfig::default(),
        };
        let mut builder = PipelineConfigBuilder::from_config(base);

        if let Some(quality) = &cli.quality {
            builder = builder.quality(quality.parse().context("Invalid --quality")?);
        }
        if let Some(model) = &cli.model {
            builder = builder.model(model.parse().context("Invalid --model")?);
        }
        if let Some(intensity) = cli.intensity {
            builder = builder.refinement_intensity(match intensity {
                CliIntensity::Standard => RefinementIntensity::Standard,
                CliIntensity::UltraHd => RefinementIntensity::UltraHD,
            });
        }

        if cli.no_edge_refinement {
            builder = builder.edge_refinement(false);
        }
        if cli.no_preserve_details {
            builder = builder.preserve_details(false);
        }
        if cli.no_enhance_details {
            builder = builder.enhance_details(false);
        }
        if cli.super_resolution {
            builder = builder.super_resolution(true);
        }
        if cli.upscale_small {
            builder = builder.upscale_small(true);
        }
        if cli.no_feather {
            builder = builder.feather_edges(false);
        }
        if let Some(amount) = cli.feather_amount {
            builder = builder.feather_amount(amount);
        }

        if cli.matting_foreground.is_some() || cli.matting_background.is_some() {
            let current = builder.current();
            let foreground = cli
                .matting_foreground
                .unwrap_or(current.matting_foreground_threshold);
            let background = cli
                .matting_background
                .unwrap_or(current.matting_background_threshold);
            builder = builder.matting_thresholds(foreground, background);
        }
        if let Some(erode) = cli.matting_erode {
            builder = builder.matting_erode_size(erode);
        }

        if let Some(contrast) = cli.contrast {
            builder = builder.contrast_boost(contrast);
        }
        if let Some(sharpness) = cli.sharpness {
            builder = builder.sharpness_boost(sharpness);
        }
        if let Some(background) = &cli.background {
            builder = builder.background(parse_background(background)?);
        }
        if let Some(blend) = cli.gradient_blend {
            builder = builder.gradient_blend(match blend {
                CliGradientBlend::Alpha => GradientBlendMask::Alpha,
                CliGradientBlend::Luminance => GradientBlendMask::Luminance,
            });
        }
        if cli.reject_missing_alpha {
            builder = builder.missing_alpha(MissingAlphaPolicy::Reject);
        }

        builder.build().context("Invalid pipeline configuration")
    }

    /// Segmentation collaborator for this invocation
    ///
    /// `--mask` supplies a precomputed mask; otherwise each input's own alpha
    /// channel is used.
    pub(crate) fn segmenter(cli: &Cli) -> Result<Arc<dyn SegmentationModel>> {
        match &cli.mask {
            Some(path) => {
                let segmenter = PrecomputedMaskSegmenter::open(path)
                    .with_context(|| format!("Failed to load mask {}", path.display()))?;
                Ok(Arc::new(segmenter))
            },
            None => Ok(Arc::new(ExistingAlphaSegmenter)),
        }
    }

    pub(crate) fn export_format(cli: &Cli) -> ExportFormat {
        match cli.format {
            CliOutputFormat::Png => ExportFormat::Png,
            CliOutputFormat::Jpg => ExportFormat::Jpeg,
            CliOutputFormat::Tiff => ExportFormat::Tiff,
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.input.is_empty() {
            anyhow::bail!("At least one input is required");
        }
        if cli.jobs == Some(0) {
            anyhow::bail!("--jobs must be at least 1");
        }
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid --pattern '{}'", pattern))?;
        }
        if let Some(mask) = &cli.mask {
            if !mask.is_file() {
                anyhow::bail!("Mask file does not exist: {}", mask.display());
            }
        }
        Ok(())
    }

    fn load_settings(path: &Path) -> Result<PipelineConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Settings file {} is not valid JSON", path.display()))?;
        let config = ProcessSettings::from_json(value)?.into_config()?;
        Ok(config)
    }
}

/// Parse a `--background` argument
///
/// `transparent`, a color (`#RRGGBB`, `#RGB`, `white`, `black`),
/// `gradient:<start>,<end>`, or a path to an image file.
pub(crate) fn parse_background(arg: &str) -> Result<BackgroundSpec> {
    let trimmed = arg.trim();
    if trimmed.eq_ignore_ascii_case("transparent") || trimmed.eq_ignore_ascii_case("none") {
        return Ok(BackgroundSpec::Transparent);
    }

    if let Some(colors) = trimmed.strip_prefix("gradient:") {
        let (start, end) = colors
            .split_once(',')
            .context("Gradient background must look like gradient:#RRGGBB,#RRGGBB")?;
        return Ok(BackgroundSpec::Gradient {
            start: start.parse()?,
            end: end.parse()?,
        });
    }

    if let Ok(color) = trimmed.parse::<RgbColor>() {
        return Ok(BackgroundSpec::SolidColor(color));
    }

    let path = Path::new(trimmed);
    if path.is_file() {
        let image = RasterBuffer::open(path)
            .with_context(|| format!("Failed to load background image {}", path.display()))?;
        return Ok(BackgroundSpec::ImageBackground(Arc::new(image)));
    }

    anyhow::bail!(
        "Unrecognized background '{}' (expected transparent, a color, gradient:<a>,<b> or an image path)",
        arg
    )
}
