//! Final global contrast and sharpness pass

use crate::{
    error::Result,
    types::{luma, RasterBuffer},
    utils::{filters::blend_rgb, sharpen_rgb},
};
use image::{Rgba, RgbaImage};
use tracing::debug;

/// Apply contrast (when `contrast != 1.0`) and then sharpening of strength
/// `1.0 + sharpness` (when `sharpness > 0`)
///
/// Contrast pivots on the image's mean grey level. Dimensions and layout are
/// preserved and alpha is never modified.
pub fn finish(image: &RasterBuffer, contrast: f32, sharpness: f32) -> Result<RasterBuffer> {
    let apply_contrast = (contrast - 1.0).abs() > f32::EPSILON;
    let apply_sharpness = sharpness > 0.0;
    if !apply_contrast && !apply_sharpness {
        return Ok(image.clone());
    }
    debug!(contrast, sharpness, "Finishing");

    let mut rgba = image.to_rgba8();
    if apply_contrast {
        adjust_contrast(&mut rgba, contrast);
    }
    if apply_sharpness {
        sharpen_rgb(&mut rgba, 1.0 + sharpness);
    }

    Ok(match image {
        RasterBuffer::Rgb(_) => RasterBuffer::Rgb(RasterBuffer::Rgba(rgba).to_rgb8()),
        RasterBuffer::Rgba(_) => RasterBuffer::Rgba(rgba),
    })
}

/// Mean luma rounded to the nearest integer
fn mean_grey(image: &RgbaImage) -> u8 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0;
    }
    let total: u64 = image
        .pixels()
        .map(|p| u64::from(luma(p[0], p[1], p[2])))
        .sum();
    ((total as f64 / count as f64) + 0.5) as u8
}

/// Scale each RGB sample's distance from the mean grey level by `factor`
fn adjust_contrast(image: &mut RgbaImage, factor: f32) {
    let mean = mean_grey(image);
    let degenerate = RgbaImage::from_pixel(image.width(), image.height(), Rgba([mean, mean, mean, 255]));
    blend_rgb(image, &degenerate, factor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn two_tone() -> RgbImage {
        let mut image = RgbImage::from_pixel(10, 10, Rgb([100, 100, 100]));
        for x in 0..5 {
            for y in 0..10 {
                image.put_pixel(x, y, Rgb([160, 160, 160]));
            }
        }
        image
    }

    #[test]
    fn test_neutral_settings_are_identity() {
        let image = RasterBuffer::Rgb(two_tone());
        assert_eq!(finish(&image, 1.0, 0.0).unwrap(), image);
    }

    #[test]
    fn test_contrast_pivots_on_mean() {
        let image = RasterBuffer::Rgb(two_tone());
        let out = finish(&image, 2.0, 0.0).unwrap().to_rgb8();
        // Mean grey is 130: 160 -> 190, 100 -> 70
        assert_eq!(out.get_pixel(0, 0), &Rgb([190, 190, 190]));
        assert_eq!(out.get_pixel(9, 0), &Rgb([70, 70, 70]));

        let flat = finish(&image, 0.0, 0.0).unwrap().to_rgb8();
        assert!(flat.pixels().all(|p| p == &Rgb([130, 130, 130])));
    }

    #[test]
    fn test_finish_preserves_dimensions_and_alpha() {
        let mut rgba = RgbaImage::from_pixel(7, 9, Rgba([50, 60, 70, 10]));
        rgba.put_pixel(3, 3, Rgba([250, 10, 10, 220]));
        let out = finish(&RasterBuffer::Rgba(rgba.clone()), 1.5, 0.8).unwrap();
        assert_eq!(out.dimensions(), (7, 9));
        let RasterBuffer::Rgba(out) = out else {
            panic!("expected RGBA output");
        };
        for (a, b) in rgba.pixels().zip(out.pixels()) {
            assert_eq!(a[3], b[3]);
        }
    }

    #[test]
    fn test_sharpness_only() {
        let image = RasterBuffer::Rgb(two_tone());
        let out = finish(&image, 1.0, 1.0).unwrap().to_rgb8();
        // The column on the bright side of the edge gets brighter
        assert!(out.get_pixel(4, 5)[0] > 160);
        assert_eq!(out.get_pixel(8, 5), &Rgb([100, 100, 100]));
    }
}
