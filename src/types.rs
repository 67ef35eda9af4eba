//! Core types shared by every pipeline stage

use crate::error::{CutoutError, Result};
use chrono::{DateTime, Utc};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Channel layout of a [`RasterBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Three 8-bit channels, no transparency
    Rgb,
    /// Four 8-bit channels with straight (non-premultiplied) alpha
    Rgba,
}

impl ChannelLayout {
    /// Number of samples per pixel
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba)
    }
}

impl std::fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rgb => write!(f, "RGB"),
            Self::Rgba => write!(f, "RGBA"),
        }
    }
}

/// The image representation every stage reads and writes
///
/// The layout tag is the variant itself, so a buffer can never disagree
/// with its own channel count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RasterBuffer {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl RasterBuffer {
    /// Normalize any decoded image into one of the two supported layouts
    ///
    /// Images carrying an alpha channel (LA, RGBA, 16-bit variants) become
    /// `Rgba`, everything else becomes `Rgb`.
    #[must_use]
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageRgb8(rgb) => Self::Rgb(rgb),
            DynamicImage::ImageRgba8(rgba) => Self::Rgba(rgba),
            other if other.color().has_alpha() => Self::Rgba(other.to_rgba8()),
            other => Self::Rgb(other.to_rgb8()),
        }
    }

    /// Decode encoded image bytes (PNG, JPEG, TIFF)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(|e| {
            CutoutError::invalid_input(format!("Failed to decode image data: {}", e))
        })?;
        Ok(Self::from_dynamic(image))
    }

    /// Load an image file from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Err(CutoutError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }
        let image = image::open(path_ref).map_err(|e| {
            CutoutError::invalid_input(format!(
                "Failed to load image '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        Ok(Self::from_dynamic(image))
    }

    /// A fully opaque solid RGB buffer
    #[must_use]
    pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::Rgb(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[must_use]
    pub fn layout(&self) -> ChannelLayout {
        match self {
            Self::Rgb(_) => ChannelLayout::Rgb,
            Self::Rgba(_) => ChannelLayout::Rgba,
        }
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.layout().has_alpha()
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Rgb(img) => img.dimensions(),
            Self::Rgba(img) => img.dimensions(),
        }
    }

    /// Raw interleaved samples
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Self::Rgb(img) => img.as_raw(),
            Self::Rgba(img) => img.as_raw(),
        }
    }

    /// Copy of the RGB channels, dropping alpha if present
    #[must_use]
    pub fn to_rgb8(&self) -> RgbImage {
        match self {
            Self::Rgb(img) => img.clone(),
            Self::Rgba(img) => {
                let (width, height) = img.dimensions();
                let mut rgb = RgbImage::new(width, height);
                for (src, dst) in img.pixels().zip(rgb.pixels_mut()) {
                    *dst = Rgb([src[0], src[1], src[2]]);
                }
                rgb
            },
        }
    }

    /// RGBA view of the buffer; RGB input becomes fully opaque
    #[must_use]
    pub fn to_rgba8(&self) -> RgbaImage {
        match self {
            Self::Rgb(img) => {
                let (width, height) = img.dimensions();
                let mut rgba = RgbaImage::new(width, height);
                for (src, dst) in img.pixels().zip(rgba.pixels_mut()) {
                    *dst = Rgba([src[0], src[1], src[2], 255]);
                }
                rgba
            },
            Self::Rgba(img) => img.clone(),
        }
    }

    /// The alpha channel as a mask, if the layout has one
    #[must_use]
    pub fn alpha_mask(&self) -> Option<AlphaMask> {
        match self {
            Self::Rgb(_) => None,
            Self::Rgba(img) => {
                let data = img.pixels().map(|p| p[3]).collect();
                Some(AlphaMask::new(data, img.dimensions()))
            },
        }
    }

    /// Rec. 601 luma of every pixel (the greyscale conversion PIL's `L` mode uses)
    #[must_use]
    pub fn luminance(&self) -> GrayImage {
        let rgb = self.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut gray = GrayImage::new(width, height);
        for (src, dst) in rgb.pixels().zip(gray.pixels_mut()) {
            *dst = Luma([luma(src[0], src[1], src[2])]);
        }
        gray
    }

    #[must_use]
    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Self::Rgb(img) => DynamicImage::ImageRgb8(img),
            Self::Rgba(img) => DynamicImage::ImageRgba8(img),
        }
    }

    /// Fail unless the buffer has the expected layout
    pub fn require_layout(&self, expected: ChannelLayout, operation: &str) -> Result<()> {
        if self.layout() == expected {
            Ok(())
        } else {
            Err(CutoutError::unsupported_format(format!(
                "{} requires {} input, got {}",
                operation,
                expected,
                self.layout()
            )))
        }
    }
}

impl From<DynamicImage> for RasterBuffer {
    fn from(image: DynamicImage) -> Self {
        Self::from_dynamic(image)
    }
}

/// Integer Rec. 601 luma, rounded the way PIL converts RGB to `L`
#[must_use]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let weighted = u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114;
    ((weighted + 500) / 1000).min(255) as u8
}

/// Per-pixel foreground confidence, 255 = fully foreground
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphaMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl AlphaMask {
    /// Create a new alpha mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// A mask with the same value everywhere
    #[must_use]
    pub fn filled(dimensions: (u32, u32), value: u8) -> Self {
        let len = dimensions.0 as usize * dimensions.1 as usize;
        Self::new(vec![value; len], dimensions)
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Collapse any decoded image into a mask (colour masks use their luma)
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        Self::from_image(&image.to_luma8())
    }

    /// Load a mask image from disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let image = image::open(path_ref).map_err(|e| {
            CutoutError::invalid_input(format!(
                "Failed to load mask '{}': {}",
                path_ref.display(),
                e
            ))
        })?;
        Ok(Self::from_dynamic(&image))
    }

    /// Convert mask to a grayscale image
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| CutoutError::internal("Mask data length does not match its dimensions"))
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.dimensions.0
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.dimensions.1
    }

    /// Value at (x, y); out-of-range coordinates read as background
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.dimensions.0 || y >= self.dimensions.1 {
            return 0;
        }
        let index = y as usize * self.dimensions.0 as usize + x as usize;
        self.data.get(index).copied().unwrap_or(0)
    }

    /// Fail unless the mask matches the given image dimensions
    pub fn ensure_dimensions(&self, dimensions: (u32, u32), context: &str) -> Result<()> {
        if self.dimensions == dimensions {
            Ok(())
        } else {
            Err(CutoutError::dimension_mismatch(
                context,
                dimensions,
                self.dimensions,
            ))
        }
    }

    /// Use this mask as the alpha channel of `image`
    ///
    /// RGB channels are kept as-is; an RGB image gains an alpha channel.
    pub fn apply_to(&self, image: &RasterBuffer) -> Result<RgbaImage> {
        self.ensure_dimensions(image.dimensions(), "mask application")?;
        let mut rgba = image.to_rgba8();
        for (pixel, &alpha) in rgba.pixels_mut().zip(self.data.iter()) {
            pixel[3] = alpha;
        }
        Ok(rgba)
    }

    /// Resize the mask to new dimensions
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<AlphaMask> {
        let current_image = self.to_image()?;
        let resized = image::imageops::resize(
            &current_image,
            new_width,
            new_height,
            image::imageops::FilterType::Lanczos3,
        );

        Ok(AlphaMask::from_image(&resized))
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&x| x > 127).count();
        let background_pixels = total_pixels - foreground_pixels;
        let total = total_pixels.max(1) as f32;

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio: foreground_pixels as f32 / total,
            background_ratio: background_pixels as f32 / total,
        }
    }

    /// Save mask as PNG
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let image = self.to_image()?;
        image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Statistics about an alpha mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

/// Pipeline stages in the order a request moves through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Segmented,
    MaskRefined,
    DetailEnhanced,
    Upscaled,
    Composited,
    Finished,
    Exported,
}

impl PipelineStage {
    /// All stages in execution order
    pub const ORDER: [PipelineStage; 7] = [
        Self::Segmented,
        Self::MaskRefined,
        Self::DetailEnhanced,
        Self::Upscaled,
        Self::Composited,
        Self::Finished,
        Self::Exported,
    ];

    /// Stable identifier used in logs and error payloads
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Segmented => "segmented",
            Self::MaskRefined => "mask_refined",
            Self::DetailEnhanced => "detail_enhanced",
            Self::Upscaled => "upscaled",
            Self::Composited => "composited",
            Self::Finished => "finished",
            Self::Exported => "exported",
        }
    }

    /// The stage that follows this one, `None` for the terminal stage
    #[must_use]
    pub fn next(self) -> Option<PipelineStage> {
        let index = Self::ORDER.iter().position(|s| *s == self)?;
        Self::ORDER.get(index + 1).copied()
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Wall-clock breakdown of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Time spent inside the segmentation collaborator
    pub segmentation_ms: u64,
    pub refinement_ms: u64,
    pub enhancement_ms: u64,
    pub upscaling_ms: u64,
    pub compositing_ms: u64,
    pub finishing_ms: u64,
    /// Export encoding, when the run ended with an export
    pub export_ms: Option<u64>,
    /// Total end-to-end time
    pub total_ms: u64,
}

impl StageTimings {
    /// Record elapsed time against a stage
    pub fn record(&mut self, stage: PipelineStage, elapsed_ms: u64) {
        match stage {
            PipelineStage::Segmented => self.segmentation_ms = elapsed_ms,
            PipelineStage::MaskRefined => self.refinement_ms = elapsed_ms,
            PipelineStage::DetailEnhanced => self.enhancement_ms = elapsed_ms,
            PipelineStage::Upscaled => self.upscaling_ms = elapsed_ms,
            PipelineStage::Composited => self.compositing_ms = elapsed_ms,
            PipelineStage::Finished => self.finishing_ms = elapsed_ms,
            PipelineStage::Exported => self.export_ms = Some(elapsed_ms),
        }
    }

    /// Sum of the measured stages
    #[must_use]
    pub fn measured_ms(&self) -> u64 {
        self.segmentation_ms
            + self.refinement_ms
            + self.enhancement_ms
            + self.upscaling_ms
            + self.compositing_ms
            + self.finishing_ms
            + self.export_ms.unwrap_or(0)
    }

    /// Get timing summary for display
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Total: {}ms | Segment: {}ms | Refine: {}ms | Enhance: {}ms | Upscale: {}ms | Composite: {}ms | Finish: {}ms",
            self.total_ms,
            self.segmentation_ms,
            self.refinement_ms,
            self.enhancement_ms,
            self.upscaling_ms,
            self.compositing_ms,
            self.finishing_ms
        );
        if let Some(export_ms) = self.export_ms {
            summary.push_str(&format!(" | Export: {}ms", export_ms));
        }
        summary
    }
}

/// Descriptive metadata attached to a pipeline result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetadata {
    /// When processing started
    pub started_at: DateTime<Utc>,
    /// Quality profile the run used
    pub profile: String,
    /// Dimensions of the image handed to segmentation
    pub original_dimensions: (u32, u32),
    /// Dimensions of the final buffer
    pub output_dimensions: (u32, u32),
    /// Channel layout of the final buffer
    pub output_layout: ChannelLayout,
    pub timings: StageTimings,
}

impl ProcessingMetadata {
    #[must_use]
    pub fn new(profile: String, original_dimensions: (u32, u32)) -> Self {
        Self {
            started_at: Utc::now(),
            profile,
            original_dimensions,
            output_dimensions: original_dimensions,
            output_layout: ChannelLayout::Rgba,
            timings: StageTimings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{LumaA, Rgb32FImage};

    #[test]
    fn test_from_dynamic_layouts() {
        let rgb = RasterBuffer::from_dynamic(DynamicImage::new_rgb8(4, 3));
        assert_eq!(rgb.layout(), ChannelLayout::Rgb);
        assert_eq!(rgb.dimensions(), (4, 3));

        let gray_alpha = ImageBuffer::from_pixel(2, 2, LumaA([10u8, 20u8]));
        let converted = RasterBuffer::from_dynamic(DynamicImage::ImageLumaA8(gray_alpha));
        assert_eq!(converted.layout(), ChannelLayout::Rgba);
        assert_eq!(converted.alpha_mask().unwrap().data, vec![20; 4]);

        let float = RasterBuffer::from_dynamic(DynamicImage::ImageRgb32F(Rgb32FImage::new(2, 2)));
        assert_eq!(float.layout(), ChannelLayout::Rgb);
    }

    #[test]
    fn test_rgb_rgba_conversions() {
        let rgba = RasterBuffer::Rgba(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])));
        assert_eq!(rgba.to_rgb8().get_pixel(1, 1), &Rgb([1, 2, 3]));

        let rgb = RasterBuffer::solid_rgb(2, 2, [9, 8, 7]);
        assert_eq!(rgb.to_rgba8().get_pixel(0, 0), &Rgba([9, 8, 7, 255]));
        assert!(rgb.alpha_mask().is_none());
        assert!(rgb.require_layout(ChannelLayout::Rgba, "compositing").is_err());
    }

    #[test]
    fn test_luma_matches_pil_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        assert_eq!(luma(255, 0, 0), 76);
        assert_eq!(luma(0, 255, 0), 150);
        assert_eq!(luma(0, 0, 255), 29);
    }

    #[test]
    fn test_mask_apply_and_mismatch() {
        let image = RasterBuffer::solid_rgb(3, 2, [10, 20, 30]);
        let mask = AlphaMask::new(vec![0, 50, 100, 150, 200, 255], (3, 2));
        let applied = mask.apply_to(&image).unwrap();
        assert_eq!(applied.get_pixel(2, 1), &Rgba([10, 20, 30, 255]));
        assert_eq!(applied.get_pixel(1, 0), &Rgba([10, 20, 30, 50]));

        let wrong = AlphaMask::filled((2, 2), 255);
        let err = wrong.apply_to(&image).unwrap_err();
        assert!(matches!(err, CutoutError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_mask_statistics() {
        let mask = AlphaMask::new(vec![0, 255, 255, 128], (2, 2));
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 3);
        assert_eq!(stats.background_pixels, 1);
        assert!((stats.foreground_ratio - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(PipelineStage::Segmented.next(), Some(PipelineStage::MaskRefined));
        assert_eq!(PipelineStage::Finished.next(), Some(PipelineStage::Exported));
        assert_eq!(PipelineStage::Exported.next(), None);
        assert!(PipelineStage::Upscaled < PipelineStage::Composited);
        assert_eq!(PipelineStage::DetailEnhanced.to_string(), "detail_enhanced");
    }

    #[test]
    fn test_timings_summary() {
        let mut timings = StageTimings::default();
        timings.record(PipelineStage::MaskRefined, 12);
        timings.record(PipelineStage::Exported, 3);
        timings.total_ms = 20;
        assert_eq!(timings.measured_ms(), 15);
        let summary = timings.summary();
        assert!(summary.contains("Refine: 12ms"));
        assert!(summary.contains("Export: 3ms"));
    }
}
