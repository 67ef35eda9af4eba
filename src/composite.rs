//! Background compositing
//!
//! Merges a cutout onto a solid, gradient or image background. The
//! transparent background is the identity; every other background produces
//! an opaque RGB buffer.

use crate::{
    config::{BackgroundSpec, GradientBlendMask, MissingAlphaPolicy, PipelineConfig, RgbColor},
    error::{CutoutError, Result},
    types::{luma, RasterBuffer},
};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use tracing::debug;

/// Compositor settings resolved from a [`PipelineConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundCompositor {
    pub gradient_blend: GradientBlendMask,
    pub missing_alpha: MissingAlphaPolicy,
}

impl Default for BackgroundCompositor {
    fn default() -> Self {
        Self {
            gradient_blend: GradientBlendMask::Alpha,
            missing_alpha: MissingAlphaPolicy::TreatAsOpaque,
        }
    }
}

impl BackgroundCompositor {
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            gradient_blend: config.gradient_blend,
            missing_alpha: config.missing_alpha,
        }
    }

    /// Composite `foreground` onto `background`
    ///
    /// # Errors
    /// - `MissingAlphaChannel` when the foreground is RGB and the policy is `Reject`
    pub fn composite(
        &self,
        foreground: &RasterBuffer,
        background: &BackgroundSpec,
    ) -> Result<RasterBuffer> {
        let (width, height) = foreground.dimensions();
        debug!(
            width,
            height,
            background = background.kind(),
            layout = %foreground.layout(),
            "Compositing"
        );

        let canvas = match background {
            BackgroundSpec::Transparent => return Ok(foreground.clone()),
            BackgroundSpec::SolidColor(color) => RgbImage::from_pixel(width, height, Rgb(color.0)),
            BackgroundSpec::Gradient { start, end } => {
                if self.gradient_blend == GradientBlendMask::Luminance {
                    let gradient = gradient_canvas(width, height, *start, *end);
                    return Ok(RasterBuffer::Rgb(blend_by_luminance(foreground, &gradient)));
                }
                gradient_canvas(width, height, *start, *end)
            },
            BackgroundSpec::ImageBackground(image) => {
                imageops::resize(&image.to_rgb8(), width, height, FilterType::Lanczos3)
            },
        };

        self.alpha_over(foreground, canvas, background.kind())
            .map(RasterBuffer::Rgb)
    }

    fn alpha_over(
        &self,
        foreground: &RasterBuffer,
        mut canvas: RgbImage,
        background_kind: &str,
    ) -> Result<RgbImage> {
        match foreground {
            RasterBuffer::Rgba(fg) => {
                for (dst, src) in canvas.pixels_mut().zip(fg.pixels()) {
                    let a = u32::from(src[3]);
                    let inv = 255 - a;
                    for c in 0..3 {
                        dst[c] = ((u32::from(src[c]) * a + u32::from(dst[c]) * inv + 127) / 255) as u8;
                    }
                }
                Ok(canvas)
            },
            RasterBuffer::Rgb(fg) => match self.missing_alpha {
                MissingAlphaPolicy::TreatAsOpaque => Ok(fg.clone()),
                MissingAlphaPolicy::Reject => Err(CutoutError::missing_alpha(format!(
                    "compositing onto a {} background requires an RGBA foreground",
                    background_kind
                ))),
            },
        }
    }
}

/// Composite with the default compositor (alpha blending, opaque RGB foregrounds)
pub fn composite(foreground: &RasterBuffer, background: &BackgroundSpec) -> Result<RasterBuffer> {
    BackgroundCompositor::default().composite(foreground, background)
}

/// Canvas whose left corners are `start` and right corners are `end`
///
/// Interpolation uses pixel-centre sampling of a 2x2 corner grid, so the
/// outermost quarter on each side is the flat corner color.
#[must_use]
pub fn gradient_canvas(width: u32, height: u32, start: RgbColor, end: RgbColor) -> RgbImage {
    let corners = [[start.0, end.0], [start.0, end.0]];
    let weight = |i: u32, len: u32| -> f32 {
        if len == 0 {
            return 0.0;
        }
        ((i as f32 + 0.5) * 2.0 / len as f32 - 0.5).clamp(0.0, 1.0)
    };

    let mut canvas = RgbImage::new(width, height);
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let fx = weight(x, width);
        let fy = weight(y, height);
        let mut rgb = [0u8; 3];
        for (c, out) in rgb.iter_mut().enumerate() {
            let top = f32::from(corners[0][0][c]) * (1.0 - fx) + f32::from(corners[0][1][c]) * fx;
            let bottom = f32::from(corners[1][0][c]) * (1.0 - fx) + f32::from(corners[1][1][c]) * fx;
            *out = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(rgb);
    }
    canvas
}

/// Legacy gradient blend: bright foreground pixels show the gradient
fn blend_by_luminance(foreground: &RasterBuffer, gradient: &RgbImage) -> RgbImage {
    let fg = foreground.to_rgb8();
    let mut out = gradient.clone();
    for (dst, src) in out.pixels_mut().zip(fg.pixels()) {
        let m = u32::from(luma(src[0], src[1], src[2]));
        let inv = 255 - m;
        for c in 0..3 {
            dst[c] = ((u32::from(dst[c]) * m + u32::from(src[c]) * inv + 127) / 255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    fn cutout() -> RasterBuffer {
        let mut image = RgbaImage::from_pixel(10, 10, Rgba([200, 40, 40, 255]));
        image.put_pixel(0, 0, Rgba([12, 34, 56, 0]));
        image.put_pixel(5, 5, Rgba([0, 0, 0, 128]));
        RasterBuffer::Rgba(image)
    }

    #[test]
    fn test_transparent_is_identity() {
        let fg = cutout();
        assert_eq!(composite(&fg, &BackgroundSpec::Transparent).unwrap(), fg);
    }

    #[test]
    fn test_solid_white_shows_through_transparency() {
        let out = composite(&cutout(), &BackgroundSpec::SolidColor(RgbColor::WHITE))
            .unwrap()
            .to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(3, 3), &Rgb([200, 40, 40]));
        // Half-transparent black over white
        assert_eq!(out.get_pixel(5, 5), &Rgb([127, 127, 127]));
    }

    #[test]
    fn test_output_is_opaque_rgb() {
        let out = composite(&cutout(), &BackgroundSpec::SolidColor(RgbColor::BLACK)).unwrap();
        assert!(!out.has_alpha());
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn test_missing_alpha_policy() {
        let fg = RasterBuffer::solid_rgb(4, 4, [9, 9, 9]);
        let bg = BackgroundSpec::SolidColor(RgbColor::WHITE);

        let out = composite(&fg, &bg).unwrap();
        assert_eq!(out, fg);

        let strict = BackgroundCompositor {
            missing_alpha: MissingAlphaPolicy::Reject,
            ..BackgroundCompositor::default()
        };
        let err = strict.composite(&fg, &bg).unwrap_err();
        assert!(matches!(err, CutoutError::MissingAlphaChannel(_)));
    }

    #[test]
    fn test_gradient_canvas_corners() {
        let start = RgbColor::new(0, 0, 0);
        let end = RgbColor::new(200, 100, 0);
        let canvas = gradient_canvas(8, 4, start, end);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(0, 3), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(7, 0), &Rgb([200, 100, 0]));
        assert_eq!(canvas.get_pixel(7, 3), &Rgb([200, 100, 0]));
        // Monotonic left to right
        let reds: Vec<u8> = (0..8).map(|x| canvas.get_pixel(x, 1)[0]).collect();
        assert!(reds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_gradient_alpha_blend() {
        let background = BackgroundSpec::Gradient {
            start: RgbColor::new(10, 20, 30),
            end: RgbColor::new(10, 20, 30),
        };
        let out = composite(&cutout(), &background).unwrap().to_rgb8();
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(out.get_pixel(9, 9), &Rgb([200, 40, 40]));
    }

    #[test]
    fn test_gradient_luminance_blend() {
        let compositor = BackgroundCompositor {
            gradient_blend: GradientBlendMask::Luminance,
            ..BackgroundCompositor::default()
        };
        let mut fg = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255]));
        fg.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let background = BackgroundSpec::Gradient {
            start: RgbColor::new(50, 60, 70),
            end: RgbColor::new(50, 60, 70),
        };

        let out = compositor
            .composite(&RasterBuffer::Rgba(fg), &background)
            .unwrap()
            .to_rgb8();
        // White selects the gradient, black keeps the foreground
        assert_eq!(out.get_pixel(0, 0), &Rgb([50, 60, 70]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_image_background_is_resized() {
        let bg = RasterBuffer::solid_rgb(3, 7, [0, 255, 0]);
        let spec = BackgroundSpec::ImageBackground(Arc::new(bg));
        let out = composite(&cutout(), &spec).unwrap().to_rgb8();
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 255, 0]));
    }
}
