//! Small pixel filters shared by several stages

use image::RgbaImage;

/// Mirror an out-of-range index back into `0..len` without repeating the edge sample
///
/// `-1` maps to `1` and `len` maps to `len - 2`; offsets wider than the axis
/// keep bouncing until they land inside.
#[must_use]
pub fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = index;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

/// 3x3 smoothing kernel used as the "degenerate" image for sharpening
const SMOOTH_KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];
const SMOOTH_SCALE: u32 = 13;

/// Smoothed copy of the RGB channels; the outermost ring of pixels is copied unchanged
fn smooth_rgb(image: &RgbaImage) -> RgbaImage {
    let (width, height) = image.dimensions();
    let mut smoothed = image.clone();
    if width < 3 || height < 3 {
        return smoothed;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = [0u32; 3];
            for (ky, row) in SMOOTH_KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    let p = image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for (sum, &channel) in acc.iter_mut().zip(p.0.iter()) {
                        *sum += weight * u32::from(channel);
                    }
                }
            }
            let out = smoothed.get_pixel_mut(x, y);
            for (dst, sum) in out.0.iter_mut().zip(acc) {
                *dst = ((sum + SMOOTH_SCALE / 2) / SMOOTH_SCALE) as u8;
            }
        }
    }
    smoothed
}

/// Interpolate (or extrapolate) each RGB sample away from `degenerate`
///
/// `factor = 1.0` returns the original image; alpha is never touched.
pub fn blend_rgb(image: &mut RgbaImage, degenerate: &RgbaImage, factor: f32) {
    for (pixel, base) in image.pixels_mut().zip(degenerate.pixels()) {
        for c in 0..3 {
            let original = f32::from(pixel[c]);
            let anchor = f32::from(base[c]);
            pixel[c] = (anchor + factor * (original - anchor)).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Sharpness enhancement: `1.0` is the identity, larger values sharpen
pub fn sharpen_rgb(image: &mut RgbaImage, factor: f32) {
    if (factor - 1.0).abs() < f32::EPSILON {
        return;
    }
    let degenerate = smooth_rgb(image);
    blend_rgb(image, &degenerate, factor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 5), 3);
        assert_eq!(reflect_101(-4, 1), 0);
        assert_eq!(reflect_101(-4, 2), 0);
    }

    #[test]
    fn test_sharpen_uniform_image_is_identity() {
        let mut image = RgbaImage::from_pixel(8, 8, Rgba([90, 120, 150, 200]));
        let original = image.clone();
        sharpen_rgb(&mut image, 3.0);
        assert_eq!(image, original);
    }

    #[test]
    fn test_sharpen_increases_local_contrast() {
        let mut image = RgbaImage::from_pixel(5, 5, Rgba([100, 100, 100, 255]));
        image.put_pixel(2, 2, Rgba([160, 160, 160, 37]));
        sharpen_rgb(&mut image, 2.0);

        let center = image.get_pixel(2, 2);
        assert!(center[0] > 160);
        assert_eq!(center[3], 37, "alpha must pass through");
        // Neighbours are pushed away from the bright centre
        assert!(image.get_pixel(1, 2)[0] < 100);
        // Border ring is copied through smoothing, so it stays put
        assert_eq!(image.get_pixel(0, 0)[0], 100);
    }

    #[test]
    fn test_tiny_images_pass_through() {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4]));
        image.put_pixel(0, 0, Rgba([200, 2, 3, 4]));
        let original = image.clone();
        sharpen_rgb(&mut image, 5.0);
        assert_eq!(image, original);
    }
}
