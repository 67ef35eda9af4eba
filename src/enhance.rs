//! Detail enhancement: local contrast on lightness only, then optional sharpening
//!
//! The image is split into CIE L\*a\*b\*; contrast-limited adaptive histogram
//! equalization runs on the 8-bit lightness plane while the chroma planes are
//! carried through untouched, so hue and saturation are preserved.

use crate::{
    error::Result,
    types::RasterBuffer,
    utils::{reflect_101, sharpen_rgb},
};
use image::{Rgba, RgbaImage};
use palette::{FromColor, IntoColor, Lab, LinSrgb, Srgb};
use tracing::debug;

/// CLAHE clip limit
pub const CLAHE_CLIP_LIMIT: f32 = 3.0;
/// CLAHE tile grid (tiles per axis)
pub const CLAHE_TILES: usize = 8;

const HIST_SIZE: usize = 256;

/// Enhance local contrast and, when `sharpness > 0`, sharpen with strength `1 + sharpness`
///
/// Dimensions and channel layout are preserved; alpha passes through untouched.
pub fn enhance(image: &RasterBuffer, sharpness: f32) -> Result<RasterBuffer> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(image.clone());
    }
    debug!(width, height, sharpness, "Enhancing details");

    let mut rgba = image.to_rgba8();
    let lab = LabPlanes::from_rgba(&rgba);
    let equalized = clahe(
        &lab.lightness,
        width as usize,
        height as usize,
        CLAHE_CLIP_LIMIT,
        CLAHE_TILES,
    );
    lab.write_rgb(&equalized, &mut rgba);

    if sharpness > 0.0 {
        sharpen_rgb(&mut rgba, 1.0 + sharpness);
    }

    Ok(match image {
        RasterBuffer::Rgb(_) => RasterBuffer::Rgb(RasterBuffer::Rgba(rgba).to_rgb8()),
        RasterBuffer::Rgba(_) => RasterBuffer::Rgba(rgba),
    })
}

/// Lightness quantized to `0..=255`, chroma kept as floats
struct LabPlanes {
    lightness: Vec<u8>,
    chroma: Vec<(f32, f32)>,
}

impl LabPlanes {
    fn from_rgba(image: &RgbaImage) -> Self {
        let mut lightness = Vec::with_capacity(image.len() / 4);
        let mut chroma = Vec::with_capacity(image.len() / 4);
        for p in image.pixels() {
            let srgb = Srgb::new(
                f32::from(p[0]) / 255.0,
                f32::from(p[1]) / 255.0,
                f32::from(p[2]) / 255.0,
            );
            let lin: LinSrgb<f32> = srgb.into_linear();
            let lab: Lab = Lab::from_color(lin);
            lightness.push((lab.l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8);
            chroma.push((lab.a, lab.b));
        }
        Self { lightness, chroma }
    }

    /// Rebuild RGB from a new lightness plane, keeping each pixel's alpha
    fn write_rgb(&self, lightness: &[u8], image: &mut RgbaImage) {
        for ((pixel, &l), &(a, b)) in image.pixels_mut().zip(lightness).zip(&self.chroma) {
            let lab = Lab::new(f32::from(l) * 100.0 / 255.0, a, b);
            let lin: LinSrgb<f32> = lab.into_color();
            let srgb: Srgb<f32> = Srgb::from_linear(lin);
            *pixel = Rgba([
                to_u8(srgb.red),
                to_u8(srgb.green),
                to_u8(srgb.blue),
                pixel[3],
            ]);
        }
    }
}

fn to_u8(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Contrast-limited adaptive histogram equalization of an 8-bit plane
///
/// Planes whose size is not a multiple of the tile grid are extended with
/// mirrored borders for histogram purposes; results are bilinearly
/// interpolated between neighbouring tile lookup tables.
fn clahe(plane: &[u8], width: usize, height: usize, clip_limit: f32, tiles: usize) -> Vec<u8> {
    let (ext_width, ext_height) = if width % tiles == 0 && height % tiles == 0 {
        (width, height)
    } else {
        (width + tiles - width % tiles, height + tiles - height % tiles)
    };
    let tile_width = ext_width / tiles;
    let tile_height = ext_height / tiles;
    let tile_area = tile_width * tile_height;

    let clip = ((clip_limit * tile_area as f32 / HIST_SIZE as f32) as usize).max(1);
    let lut_scale = (HIST_SIZE - 1) as f32 / tile_area as f32;

    let mut luts = vec![[0u8; HIST_SIZE]; tiles * tiles];
    for ty in 0..tiles {
        for tx in 0..tiles {
            let mut hist = [0usize; HIST_SIZE];
            for y in ty * tile_height..(ty + 1) * tile_height {
                let row = reflect_101(y as isize, height) * width;
                for x in tx * tile_width..(tx + 1) * tile_width {
                    let value = plane[row + reflect_101(x as isize, width)];
                    hist[value as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);

            let lut = &mut luts[ty * tiles + tx];
            let mut cumulative = 0usize;
            for (entry, count) in lut.iter_mut().zip(hist.iter()) {
                cumulative += count;
                *entry = (cumulative as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    let inv_tile_width = 1.0 / tile_width as f32;
    let inv_tile_height = 1.0 / tile_height as f32;
    let last_tile = tiles as isize - 1;
    let mut out = vec![0u8; width * height];

    for y in 0..height {
        let tyf = y as f32 * inv_tile_height - 0.5;
        let ty1 = tyf.floor() as isize;
        let ya = tyf - ty1 as f32;
        let ty2 = (ty1 + 1).min(last_tile) as usize;
        let ty1 = ty1.max(0) as usize;

        for x in 0..width {
            let txf = x as f32 * inv_tile_width - 0.5;
            let tx1 = txf.floor() as isize;
            let xa = txf - tx1 as f32;
            let tx2 = (tx1 + 1).min(last_tile) as usize;
            let tx1 = tx1.max(0) as usize;

            let value = plane[y * width + x] as usize;
            let sample = |ty: usize, tx: usize| f32::from(luts[ty * tiles + tx][value]);
            let top = sample(ty1, tx1) * (1.0 - xa) + sample(ty1, tx2) * xa;
            let bottom = sample(ty2, tx1) * (1.0 - xa) + sample(ty2, tx2) * xa;
            out[y * width + x] = (top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Clip bins at `limit` and spread the excess evenly across the histogram
fn clip_histogram(hist: &mut [usize; HIST_SIZE], limit: usize) {
    let mut clipped = 0usize;
    for bin in hist.iter_mut() {
        if *bin > limit {
            clipped += *bin - limit;
            *bin = limit;
        }
    }

    let batch = clipped / HIST_SIZE;
    let mut residual = clipped - batch * HIST_SIZE;
    for bin in hist.iter_mut() {
        *bin += batch;
    }

    if residual > 0 {
        let step = (HIST_SIZE / residual).max(1);
        let mut index = 0;
        while index < HIST_SIZE && residual > 0 {
            hist[index] += 1;
            residual -= 1;
            index += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn low_contrast_gradient(width: u32, height: u32) -> RgbImage {
        let mut image = RgbImage::new(width, height);
        for (x, _, pixel) in image.enumerate_pixels_mut() {
            let v = 100 + (x * 40 / width.max(1)) as u8;
            *pixel = Rgb([v, v, v]);
        }
        image
    }

    fn spread(image: &RgbImage) -> u8 {
        let values: Vec<u8> = image.pixels().map(|p| p[0]).collect();
        values.iter().max().unwrap() - values.iter().min().unwrap()
    }

    #[test]
    fn test_enhance_preserves_dimensions_and_layout() {
        let rgb = RasterBuffer::Rgb(low_contrast_gradient(37, 21));
        let out = enhance(&rgb, 0.0).unwrap();
        assert_eq!(out.dimensions(), (37, 21));
        assert!(!out.has_alpha());

        let rgba = RasterBuffer::Rgba(RgbaImage::from_pixel(13, 50, Rgba([10, 200, 30, 99])));
        let out = enhance(&rgba, 0.5).unwrap();
        assert_eq!(out.dimensions(), (13, 50));
        assert!(out.has_alpha());
    }

    #[test]
    fn test_alpha_passes_through() {
        let mut image = RgbaImage::new(32, 32);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 8) as u8, (y * 8) as u8, 128, ((x + y) * 4) as u8]);
        }
        let out = enhance(&RasterBuffer::Rgba(image.clone()), 1.0).unwrap();
        let RasterBuffer::Rgba(out) = out else {
            panic!("expected RGBA output");
        };
        for (a, b) in image.pixels().zip(out.pixels()) {
            assert_eq!(a[3], b[3]);
        }
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        // Alternating columns two grey levels apart
        let mut input = RgbImage::new(128, 128);
        for (x, _, pixel) in input.enumerate_pixels_mut() {
            let v = if x % 2 == 0 { 120 } else { 130 };
            *pixel = Rgb([v, v, v]);
        }
        let out = enhance(&RasterBuffer::Rgb(input.clone()), 0.0).unwrap().to_rgb8();
        assert!(spread(&out) > spread(&input));
    }

    #[test]
    fn test_grey_stays_grey() {
        let input = low_contrast_gradient(40, 40);
        let out = enhance(&RasterBuffer::Rgb(input), 0.0).unwrap().to_rgb8();
        for p in out.pixels() {
            let max = p.0.iter().max().unwrap();
            let min = p.0.iter().min().unwrap();
            assert!(max - min <= 2, "chroma drifted: {:?}", p);
        }
    }

    #[test]
    fn test_clip_histogram_conserves_mass() {
        let mut hist = [0usize; HIST_SIZE];
        hist[10] = 500;
        hist[200] = 20;
        clip_histogram(&mut hist, 40);
        assert_eq!(hist.iter().sum::<usize>(), 520);
        assert!(hist[10] <= 40 + 2);
    }

    #[test]
    fn test_clahe_tiny_plane() {
        let plane = vec![10u8, 200, 30, 90, 120, 250];
        let out = clahe(&plane, 3, 2, CLAHE_CLIP_LIMIT, CLAHE_TILES);
        assert_eq!(out.len(), plane.len());
    }

    #[test]
    fn test_zero_sized_image() {
        let empty = RasterBuffer::Rgb(RgbImage::new(0, 0));
        assert_eq!(enhance(&empty, 1.0).unwrap(), empty);
    }
}
