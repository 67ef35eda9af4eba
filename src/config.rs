//! Configuration types for cutout pipeline operations
//!
//! Every stage receives its parameters from an explicit [`PipelineConfig`];
//! nothing is read from ambient or global state.

use crate::{
    error::{CutoutError, Result},
    services::ImageIOService,
    types::RasterBuffer,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Quality profile gating which optional stages run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityProfile {
    Draft,
    Good,
    High,
    /// The only profile that runs the full refinement chain
    UltraHD,
}

impl QualityProfile {
    /// Whether this profile runs refinement, enhancement and upscaling
    ///
    /// All other profiles use the model's raw cutout.
    #[must_use]
    pub fn runs_full_refinement(self) -> bool {
        matches!(self, Self::UltraHD)
    }

    /// Refinement strength implied by the profile
    #[must_use]
    pub fn refinement_intensity(self) -> RefinementIntensity {
        if self.runs_full_refinement() {
            RefinementIntensity::UltraHD
        } else {
            RefinementIntensity::Standard
        }
    }
}

impl Default for QualityProfile {
    fn default() -> Self {
        Self::UltraHD
    }
}

impl std::fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "Draft"),
            Self::Good => write!(f, "Good"),
            Self::High => write!(f, "High"),
            Self::UltraHD => write!(f, "Ultra HD"),
        }
    }
}

impl FromStr for QualityProfile {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "draft" => Ok(Self::Draft),
            "good" => Ok(Self::Good),
            "high" => Ok(Self::High),
            "ultrahd" | "ultra" => Ok(Self::UltraHD),
            _ => Err(CutoutError::invalid_config(format!(
                "Unknown quality profile '{}' (expected Draft, Good, High or Ultra HD)",
                s
            ))),
        }
    }
}

/// How hard the mask refiner works
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefinementIntensity {
    /// One smoothing/morphology pass
    Standard,
    /// Three passes with edge sharpening on the second
    UltraHD,
}

impl RefinementIntensity {
    /// Number of refinement iterations
    #[must_use]
    pub fn passes(self) -> usize {
        match self {
            Self::Standard => 1,
            Self::UltraHD => 3,
        }
    }
}

/// Segmentation model variants the external collaborator understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// Highest quality general model
    U2net,
    /// Human segmentation model
    U2netHumanSeg,
    /// Fast, lightweight model
    U2netp,
}

impl ModelVariant {
    /// Identifier passed to the segmentation session
    #[must_use]
    pub fn identifier(self) -> &'static str {
        match self {
            Self::U2net => "u2net",
            Self::U2netHumanSeg => "u2net_human_seg",
            Self::U2netp => "u2netp",
        }
    }
}

impl Default for ModelVariant {
    fn default() -> Self {
        Self::U2netHumanSeg
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for ModelVariant {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "u2net" => Ok(Self::U2net),
            "u2net_human_seg" => Ok(Self::U2netHumanSeg),
            "u2netp" => Ok(Self::U2netp),
            other => Err(CutoutError::invalid_config(format!(
                "Unknown model variant '{}' (expected u2net, u2net_human_seg or u2netp)",
                other
            ))),
        }
    }
}

/// An opaque 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RgbColor(pub [u8; 3]);

impl RgbColor {
    pub const WHITE: RgbColor = RgbColor([255, 255, 255]);
    pub const BLACK: RgbColor = RgbColor([0, 0, 0]);

    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Format as `#RRGGBB`
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for RgbColor {
    type Err = CutoutError;

    /// Accepts `#RRGGBB`, `RRGGBB`, `#RGB` and the names `white`/`black`
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "white" => return Ok(Self::WHITE),
            "black" => return Ok(Self::BLACK),
            _ => {},
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let invalid = || {
            CutoutError::invalid_config(format!(
                "Invalid color '{}' (expected #RRGGBB or #RGB)",
                s
            ))
        };
        if !hex.is_ascii() {
            return Err(invalid());
        }
        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());

        match hex.len() {
            6 => Ok(Self([
                channel(hex.get(0..2).ok_or_else(invalid)?)?,
                channel(hex.get(2..4).ok_or_else(invalid)?)?,
                channel(hex.get(4..6).ok_or_else(invalid)?)?,
            ])),
            3 => {
                let mut rgb = [0u8; 3];
                for (slot, i) in rgb.iter_mut().zip(0..3) {
                    let nibble = channel(hex.get(i..=i).ok_or_else(invalid)?)?;
                    *slot = nibble * 17;
                }
                Ok(Self(rgb))
            },
            _ => Err(invalid()),
        }
    }
}

/// What the subject is composited onto
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundSpec {
    /// Keep the cutout's transparency
    Transparent,
    /// Opaque single-color canvas
    SolidColor(RgbColor),
    /// Corner-seeded gradient canvas (start on the left corners, end on the right)
    Gradient { start: RgbColor, end: RgbColor },
    /// An image resized to the foreground's dimensions
    ImageBackground(Arc<RasterBuffer>),
}

impl BackgroundSpec {
    /// Short name used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::SolidColor(_) => "solid",
            Self::Gradient { .. } => "gradient",
            Self::ImageBackground(_) => "image",
        }
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent)
    }
}

impl Default for BackgroundSpec {
    fn default() -> Self {
        Self::Transparent
    }
}

/// Blend mask used when compositing onto a gradient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradientBlendMask {
    /// Foreground alpha, like the solid and image paths
    Alpha,
    /// Foreground luminance selects the gradient (bright pixels show the gradient).
    /// Kept for compatibility with outputs of the legacy web front-end.
    Luminance,
}

impl Default for GradientBlendMask {
    fn default() -> Self {
        Self::Alpha
    }
}

/// What compositing does with a foreground that has no alpha channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissingAlphaPolicy {
    /// The foreground is fully opaque and hides the background entirely
    TreatAsOpaque,
    /// Fail with `MissingAlphaChannel`
    Reject,
}

impl Default for MissingAlphaPolicy {
    fn default() -> Self {
        Self::TreatAsOpaque
    }
}

/// Matting parameters forwarded to the segmentation collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MattingParams {
    pub foreground_threshold: u8,
    pub background_threshold: u8,
    pub erode_size: u32,
    pub post_process_mask: bool,
}

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct PipelineConfig {
    /// Quality profile gating the optional stages
    pub quality: QualityProfile,

    /// Refinement strength; `None` derives it from the profile
    pub refinement_intensity: Option<RefinementIntensity>,

    /// Segmentation model variant requested from the collaborator
    pub model: ModelVariant,

    /// Run the mask refiner
    pub edge_refinement: bool,

    /// Ask the segmentation model to post-process its mask
    pub preserve_details: bool,

    /// Run the detail enhancer
    pub enhance_details: bool,

    /// Classical 2x Lanczos upscale when the original is under 4000px
    pub super_resolution: bool,

    /// 2x Lanczos upscale when the original is under 2000px
    pub upscale_small: bool,

    /// Alpha matting foreground threshold (0-255)
    pub matting_foreground_threshold: u8,

    /// Alpha matting background threshold (0-255)
    pub matting_background_threshold: u8,

    /// Alpha matting erode size in pixels
    pub matting_erode_size: u32,

    /// Soften the refined mask boundary
    pub feather_edges: bool,

    /// Feather radius; the Gaussian kernel is `2 * amount + 1` wide
    pub feather_amount: u32,

    /// Final global contrast factor (1.0 = unchanged)
    pub contrast_boost: f32,

    /// Sharpening amount; strength applied is `1.0 + sharpness_boost`
    pub sharpness_boost: f32,

    /// Background to composite onto
    pub background: BackgroundSpec,

    /// Blend mask for gradient backgrounds
    pub gradient_blend: GradientBlendMask,

    /// Behaviour for foregrounds without alpha
    pub missing_alpha: MissingAlphaPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality: QualityProfile::default(),
            refinement_intensity: None,
            model: ModelVariant::default(),
            edge_refinement: true,
            preserve_details: true,
            enhance_details: true,
            super_resolution: false,
            upscale_small: false,
            matting_foreground_threshold: 240,
            matting_background_threshold: 10,
            matting_erode_size: 15,
            feather_edges: true,
            feather_amount: 7,
            contrast_boost: 1.0,
            sharpness_boost: 0.0,
            background: BackgroundSpec::Transparent,
            gradient_blend: GradientBlendMask::default(),
            missing_alpha: MissingAlphaPolicy::default(),
        }
    }
}

/// Upper bound on the feather radius; larger kernels only flatten the mask
pub const MAX_FEATHER_AMOUNT: u32 = 255;

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cutout_pipeline::config::{BackgroundSpec, PipelineConfig, QualityProfile, RgbColor};
    ///
    /// let config = PipelineConfig::builder()
    ///     .quality(QualityProfile::UltraHD)
    ///     .feather_amount(3)
    ///     .background(BackgroundSpec::SolidColor(RgbColor::WHITE))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.feather_amount, 3);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Refinement intensity actually used for this run
    #[must_use]
    pub fn effective_intensity(&self) -> RefinementIntensity {
        self.refinement_intensity
            .unwrap_or_else(|| self.quality.refinement_intensity())
    }

    /// Matting parameters for the segmentation collaborator
    #[must_use]
    pub fn matting_params(&self) -> MattingParams {
        MattingParams {
            foreground_threshold: self.matting_foreground_threshold,
            background_threshold: self.matting_background_threshold,
            erode_size: self.matting_erode_size,
            post_process_mask: self.preserve_details,
        }
    }

    /// Whether any stage could change the raw cutout's pixels or size
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        let refinement_off = !self.quality.runs_full_refinement()
            || (!self.edge_refinement
                && !self.enhance_details
                && !self.super_resolution
                && !self.upscale_small);
        refinement_off
            && self.background.is_transparent()
            && (self.contrast_boost - 1.0).abs() < f32::EPSILON
            && self.sharpness_boost <= 0.0
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Feather amount: 0-255
    /// - Contrast and sharpness boosts: finite and non-negative, no upper bound
    /// - Matting thresholds are `u8` and therefore always in 0-255
    ///
    /// # Errors
    /// - Out-of-range feather amount
    /// - Negative, NaN or infinite boosts
    pub fn validate(&self) -> Result<()> {
        if self.feather_amount > MAX_FEATHER_AMOUNT {
            return Err(CutoutError::config_value_error(
                "feather amount",
                self.feather_amount,
                "0-255",
                Some(7),
            ));
        }

        for (name, value, recommended) in [
            ("contrast boost", self.contrast_boost, 1.0),
            ("sharpness boost", self.sharpness_boost, 0.5),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CutoutError::config_value_error(
                    name,
                    value,
                    "finite, >= 0.0",
                    Some(recommended),
                ));
            }
        }

        if let BackgroundSpec::ImageBackground(bg) = &self.background {
            let (width, height) = bg.dimensions();
            if width == 0 || height == 0 {
                return Err(CutoutError::invalid_config(
                    "Background image has zero width or height",
                ));
            }
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration instead of the defaults
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Configuration as currently set
    #[must_use]
    pub fn current(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn quality(mut self, quality: QualityProfile) -> Self {
        self.config.quality = quality;
        self
    }

    #[must_use]
    pub fn refinement_intensity(mut self, intensity: RefinementIntensity) -> Self {
        self.config.refinement_intensity = Some(intensity);
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelVariant) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn edge_refinement(mut self, enabled: bool) -> Self {
        self.config.edge_refinement = enabled;
        self
    }

    #[must_use]
    pub fn preserve_details(mut self, enabled: bool) -> Self {
        self.config.preserve_details = enabled;
        self
    }

    #[must_use]
    pub fn enhance_details(mut self, enabled: bool) -> Self {
        self.config.enhance_details = enabled;
        self
    }

    #[must_use]
    pub fn super_resolution(mut self, enabled: bool) -> Self {
        self.config.super_resolution = enabled;
        self
    }

    #[must_use]
    pub fn upscale_small(mut self, enabled: bool) -> Self {
        self.config.upscale_small = enabled;
        self
    }

    #[must_use]
    pub fn matting_thresholds(mut self, foreground: u8, background: u8) -> Self {
        self.config.matting_foreground_threshold = foreground;
        self.config.matting_background_threshold = background;
        self
    }

    #[must_use]
    pub fn matting_erode_size(mut self, size: u32) -> Self {
        self.config.matting_erode_size = size;
        self
    }

    #[must_use]
    pub fn feather_edges(mut self, enabled: bool) -> Self {
        self.config.feather_edges = enabled;
        self
    }

    /// Set feather radius (clamped to 255)
    #[must_use]
    pub fn feather_amount(mut self, amount: u32) -> Self {
        self.config.feather_amount = amount.min(MAX_FEATHER_AMOUNT);
        self
    }

    #[must_use]
    pub fn contrast_boost(mut self, contrast: f32) -> Self {
        self.config.contrast_boost = contrast;
        self
    }

    #[must_use]
    pub fn sharpness_boost(mut self, sharpness: f32) -> Self {
        self.config.sharpness_boost = sharpness;
        self
    }

    #[must_use]
    pub fn background(mut self, background: BackgroundSpec) -> Self {
        self.config.background = background;
        self
    }

    #[must_use]
    pub fn gradient_blend(mut self, blend: GradientBlendMask) -> Self {
        self.config.gradient_blend = blend;
        self
    }

    #[must_use]
    pub fn missing_alpha(mut self, policy: MissingAlphaPolicy) -> Self {
        self.config.missing_alpha = policy;
        self
    }

    /// Disable every stage that changes pixels or size of the raw cutout
    #[must_use]
    pub fn passthrough(mut self) -> Self {
        self.config.edge_refinement = false;
        self.config.enhance_details = false;
        self.config.super_resolution = false;
        self.config.upscale_small = false;
        self.config.contrast_boost = 1.0;
        self.config.sharpness_boost = 0.0;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings map sent by front-ends alongside a process request
///
/// Field names and defaults match the web front-end; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub quality: Option<String>,
    pub model: Option<String>,
    pub edge_refinement: bool,
    pub preserve_details: bool,
    pub enhance_details: bool,
    pub super_resolution: bool,
    pub upscale_small: bool,
    pub matting_foreground: i64,
    pub matting_background: i64,
    pub matting_erode: i64,
    pub feather_edges: bool,
    pub feather_amount: i64,
    pub contrast_boost: f32,
    pub sharpness_boost: f32,
    pub background_type: String,
    pub bg_color: String,
    pub gradient_start: String,
    pub gradient_end: String,
    pub gradient_blend: Option<GradientBlendMask>,
    /// Background image as a `data:image/...;base64,` URI
    pub bg_image: Option<String>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            quality: None,
            model: None,
            edge_refinement: true,
            preserve_details: true,
            enhance_details: true,
            super_resolution: false,
            upscale_small: false,
            matting_foreground: 240,
            matting_background: 10,
            matting_erode: 15,
            feather_edges: true,
            feather_amount: 7,
            contrast_boost: 1.0,
            sharpness_boost: 0.0,
            background_type: "Transparent".to_string(),
            bg_color: "#FFFFFF".to_string(),
            gradient_start: "#4CAF50".to_string(),
            gradient_end: "#2196F3".to_string(),
            gradient_blend: None,
            bg_image: None,
        }
    }
}

impl ProcessSettings {
    /// Parse a JSON settings object
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| CutoutError::invalid_config(format!("Malformed settings: {}", e)))
    }

    /// Convert into a validated [`PipelineConfig`]
    ///
    /// # Errors
    /// - Out-of-range numeric settings
    /// - Unknown quality, model or background type
    /// - Unparseable colors or background image
    pub fn into_config(self) -> Result<PipelineConfig> {
        let quality = match self.quality.as_deref() {
            Some(q) => q.parse()?,
            None => QualityProfile::default(),
        };
        let model = match self.model.as_deref() {
            Some(m) => m.parse()?,
            None => ModelVariant::default(),
        };

        let matting_foreground = u8_setting("matting foreground", self.matting_foreground, 240)?;
        let matting_background = u8_setting("matting background", self.matting_background, 10)?;
        let matting_erode = non_negative_setting("matting erode", self.matting_erode, 15)?;
        let feather_amount = non_negative_setting("feather amount", self.feather_amount, 7)?;

        let background = self.background_spec()?;

        let mut builder = PipelineConfig::builder()
            .quality(quality)
            .model(model)
            .edge_refinement(self.edge_refinement)
            .preserve_details(self.preserve_details)
            .enhance_details(self.enhance_details)
            .super_resolution(self.super_resolution)
            .upscale_small(self.upscale_small)
            .matting_thresholds(matting_foreground, matting_background)
            .matting_erode_size(matting_erode)
            .feather_edges(self.feather_edges)
            .contrast_boost(self.contrast_boost)
            .sharpness_boost(self.sharpness_boost)
            .background(background);

        if feather_amount > MAX_FEATHER_AMOUNT {
            return Err(CutoutError::config_value_error(
                "feather amount",
                feather_amount,
                "0-255",
                Some(7),
            ));
        }
        builder = builder.feather_amount(feather_amount);

        if let Some(blend) = self.gradient_blend {
            builder = builder.gradient_blend(blend);
        }

        builder.build()
    }

    fn background_spec(&self) -> Result<BackgroundSpec> {
        match self.background_type.trim().to_ascii_lowercase().as_str() {
            "" | "transparent" | "none" => Ok(BackgroundSpec::Transparent),
            "white" => Ok(BackgroundSpec::SolidColor(RgbColor::WHITE)),
            "black" => Ok(BackgroundSpec::SolidColor(RgbColor::BLACK)),
            "color" | "custom color" | "solid" => {
                Ok(BackgroundSpec::SolidColor(self.bg_color.parse()?))
            },
            "gradient" => Ok(BackgroundSpec::Gradient {
                start: self.gradient_start.parse()?,
                end: self.gradient_end.parse()?,
            }),
            "image" | "upload image" => {
                let uri = self.bg_image.as_deref().ok_or_else(|| {
                    CutoutError::invalid_input("Background type 'Image' requires bg_image")
                })?;
                let background = ImageIOService::decode_data_uri(uri)?;
                Ok(BackgroundSpec::ImageBackground(Arc::new(background)))
            },
            other => Err(CutoutError::invalid_config(format!(
                "Unknown background type '{}' (expected Transparent, Color, Gradient or Image)",
                other
            ))),
        }
    }
}

fn u8_setting(name: &str, value: i64, recommended: i64) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| CutoutError::config_value_error(name, value, "0-255", Some(recommended)))
}

fn non_negative_setting(name: &str, value: i64, recommended: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| CutoutError::config_value_error(name, value, ">= 0", Some(recommended)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality, QualityProfile::UltraHD);
        assert_eq!(config.effective_intensity(), RefinementIntensity::UltraHD);
        assert_eq!(config.matting_foreground_threshold, 240);
        assert_eq!(config.matting_background_threshold, 10);
        assert_eq!(config.matting_erode_size, 15);
        assert_eq!(config.feather_amount, 7);
    }

    #[test]
    fn test_validation_rejects_bad_boosts() {
        let mut config = PipelineConfig::default();
        config.contrast_boost = -0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("contrast boost"));

        config.contrast_boost = 1.0;
        config.sharpness_boost = f32::NAN;
        assert!(config.validate().is_err());

        config.sharpness_boost = 0.5;
        config.feather_amount = 300;
        assert!(config.validate().unwrap_err().to_string().contains("feather amount"));
    }

    #[test]
    fn test_large_finite_boosts_are_valid() {
        let config = PipelineConfig::builder()
            .contrast_boost(12.0)
            .sharpness_boost(250.0)
            .build()
            .unwrap();
        assert!((config.contrast_boost - 12.0).abs() < f32::EPSILON);
        assert!((config.sharpness_boost - 250.0).abs() < f32::EPSILON);

        let zeroed = PipelineConfig::builder()
            .contrast_boost(0.0)
            .sharpness_boost(0.0)
            .build();
        assert!(zeroed.is_ok());
    }

    #[test]
    fn test_builder_clamps_feather() {
        let config = PipelineConfig::builder().feather_amount(1000).build().unwrap();
        assert_eq!(config.feather_amount, MAX_FEATHER_AMOUNT);
    }

    #[test]
    fn test_passthrough_builder() {
        let config = PipelineConfig::builder().passthrough().build().unwrap();
        assert!(config.is_passthrough());

        let config = PipelineConfig::builder()
            .passthrough()
            .background(BackgroundSpec::SolidColor(RgbColor::WHITE))
            .build()
            .unwrap();
        assert!(!config.is_passthrough());
    }

    #[test]
    fn test_quality_profile_parsing() {
        assert_eq!("Ultra HD".parse::<QualityProfile>().unwrap(), QualityProfile::UltraHD);
        assert_eq!("ultra_hd".parse::<QualityProfile>().unwrap(), QualityProfile::UltraHD);
        assert_eq!("Draft".parse::<QualityProfile>().unwrap(), QualityProfile::Draft);
        assert!("Insane".parse::<QualityProfile>().is_err());
        assert!(!QualityProfile::High.runs_full_refinement());
        assert_eq!(
            QualityProfile::Good.refinement_intensity(),
            RefinementIntensity::Standard
        );
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!("#FFFFFF".parse::<RgbColor>().unwrap(), RgbColor::WHITE);
        assert_eq!("4CAF50".parse::<RgbColor>().unwrap(), RgbColor::new(0x4C, 0xAF, 0x50));
        assert_eq!("#f0a".parse::<RgbColor>().unwrap(), RgbColor::new(0xFF, 0x00, 0xAA));
        assert_eq!("Black".parse::<RgbColor>().unwrap(), RgbColor::BLACK);
        assert!("#GGGGGG".parse::<RgbColor>().is_err());
        assert!("#12345".parse::<RgbColor>().is_err());
        assert_eq!(RgbColor::new(33, 150, 243).to_hex(), "#2196F3");
    }

    #[test]
    fn test_model_variant_parsing() {
        assert_eq!("u2netp".parse::<ModelVariant>().unwrap(), ModelVariant::U2netp);
        assert_eq!(ModelVariant::default().identifier(), "u2net_human_seg");
        assert!("isnet".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn test_settings_defaults_match_front_end() {
        let settings = ProcessSettings::from_json(json!({})).unwrap();
        let config = settings.into_config().unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_settings_conversion() {
        let settings = ProcessSettings::from_json(json!({
            "quality": "High",
            "edge_refinement": false,
            "matting_foreground": 200,
            "matting_erode": 5,
            "feather_amount": 0,
            "sharpness_boost": 0.5,
            "background_type": "Gradient",
            "gradient_start": "#000000",
            "unknown_key": 42
        }))
        .unwrap();
        let config = settings.into_config().unwrap();

        assert_eq!(config.quality, QualityProfile::High);
        assert!(!config.edge_refinement);
        assert_eq!(config.matting_foreground_threshold, 200);
        assert_eq!(config.matting_erode_size, 5);
        assert_eq!(config.feather_amount, 0);
        assert_eq!(
            config.background,
            BackgroundSpec::Gradient {
                start: RgbColor::BLACK,
                end: RgbColor::new(0x21, 0x96, 0xF3),
            }
        );
    }

    #[test]
    fn test_settings_out_of_range() {
        let settings = ProcessSettings::from_json(json!({ "matting_foreground": 300 })).unwrap();
        let err = settings.into_config().unwrap_err();
        assert!(err.to_string().contains("matting foreground"));
        assert!(err.to_string().contains("300"));

        let settings = ProcessSettings::from_json(json!({ "matting_erode": -1 })).unwrap();
        assert!(settings.into_config().is_err());

        let settings = ProcessSettings::from_json(json!({ "background_type": "Plaid" })).unwrap();
        assert!(settings.into_config().is_err());
    }

    #[test]
    fn test_image_background_requires_payload() {
        let settings = ProcessSettings::from_json(json!({ "background_type": "Image" })).unwrap();
        let err = settings.into_config().unwrap_err();
        assert!(matches!(err, CutoutError::InvalidInputFormat(_)));
    }
}
