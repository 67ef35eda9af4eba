//! Mask refinement: turns a raw model confidence mask into a clean,
//! feathered alpha channel
//!
//! Each pass smooths the mask with an edge-preserving bilateral filter and
//! removes speckle with a morphological close/open. The second pass also
//! sharpens the boundary with a Laplacian term. Feathering blurs the result
//! and stretches it back to the full `[0, 1]` range before quantization.

use crate::{
    config::{PipelineConfig, RefinementIntensity},
    error::Result,
    types::{AlphaMask, RasterBuffer},
    utils::reflect_101,
};
use ndarray::Array2;
use tracing::{debug, trace};

/// Bilateral filter neighbourhood diameter
pub const BILATERAL_DIAMETER: usize = 9;
/// Bilateral range (intensity) sigma
pub const BILATERAL_SIGMA_COLOR: f32 = 75.0;
/// Bilateral spatial sigma
pub const BILATERAL_SIGMA_SPACE: f32 = 75.0;

/// Iteration index (0-based) that applies the Laplacian edge sharpening
const EDGE_SHARPEN_PASS: usize = 1;

/// Fixed binomial kernels used for small Gaussian apertures
const SMALL_GAUSSIAN_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[0.03125, 0.109_375, 0.218_75, 0.281_25, 0.218_75, 0.109_375, 0.03125],
];

/// Mask refinement parameters resolved from a [`PipelineConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRefiner {
    passes: usize,
    feather_radius: Option<u32>,
}

impl MaskRefiner {
    /// Refiner for the given intensity; feathering follows the config
    ///
    /// A `feather_amount` of 0 disables the whole feather step, including the
    /// min-max renormalization, even when `feather_edges` is set. The mask
    /// keeps the range the refinement passes produced.
    #[must_use]
    pub fn new(config: &PipelineConfig, intensity: RefinementIntensity) -> Self {
        let feather_radius = if config.feather_edges && config.feather_amount > 0 {
            Some(config.feather_amount)
        } else {
            None
        };
        Self {
            passes: intensity.passes(),
            feather_radius,
        }
    }

    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Refine a raw mask into an 8-bit alpha mask of the same size
    pub fn refine_mask(&self, raw_mask: &AlphaMask) -> Result<AlphaMask> {
        let mut mask = mask_to_array(raw_mask);

        for pass in 0..self.passes {
            mask = bilateral_filter(
                &mask,
                BILATERAL_DIAMETER,
                BILATERAL_SIGMA_COLOR,
                BILATERAL_SIGMA_SPACE,
            );
            mask = morphological_open(&morphological_close(&mask));

            if pass == EDGE_SHARPEN_PASS {
                mask = sharpen_edges(&mask);
            }
            trace!(pass, "Mask refinement pass complete");
        }

        if let Some(radius) = self.feather_radius {
            mask = gaussian_blur(&mask, 2 * radius as usize + 1);
            normalize_min_max(&mut mask);
        }

        Ok(quantize(&mask, raw_mask.dimensions))
    }

    /// Refine `raw_mask` and attach it as the alpha channel of `cutout`
    ///
    /// # Errors
    /// - `DimensionMismatch` when mask and cutout sizes disagree
    pub fn refine(&self, cutout: &RasterBuffer, raw_mask: &AlphaMask) -> Result<RasterBuffer> {
        raw_mask.ensure_dimensions(cutout.dimensions(), "mask refinement")?;

        debug!(
            width = cutout.width(),
            height = cutout.height(),
            passes = self.passes,
            feather = ?self.feather_radius,
            "Refining mask"
        );

        let refined = self.refine_mask(raw_mask)?;
        Ok(RasterBuffer::Rgba(refined.apply_to(cutout)?))
    }
}

/// Refine a cutout's mask with the given intensity
///
/// Output is always RGBA: RGB from `cutout`, alpha from the refined mask.
///
/// # Errors
/// - `DimensionMismatch` when mask and cutout sizes disagree
pub fn refine(
    cutout: &RasterBuffer,
    raw_mask: &AlphaMask,
    config: &PipelineConfig,
    intensity: RefinementIntensity,
) -> Result<RasterBuffer> {
    MaskRefiner::new(config, intensity).refine(cutout, raw_mask)
}

fn mask_to_array(mask: &AlphaMask) -> Array2<f32> {
    let (width, height) = mask.dimensions;
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        f32::from(mask.get(x as u32, y as u32)) / 255.0
    })
}

fn quantize(mask: &Array2<f32>, dimensions: (u32, u32)) -> AlphaMask {
    let data = mask
        .iter()
        .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    AlphaMask::new(data, dimensions)
}

/// Edge-preserving smoothing with a circular window
fn bilateral_filter(
    mask: &Array2<f32>,
    diameter: usize,
    sigma_color: f32,
    sigma_space: f32,
) -> Array2<f32> {
    let (rows, cols) = mask.dim();
    let radius = (diameter / 2) as isize;
    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist_sq = (dy * dy + dx * dx) as f32;
            if dist_sq <= (radius * radius) as f32 {
                offsets.push((dy, dx, (dist_sq * space_coeff).exp()));
            }
        }
    }

    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let center = mask[[y, x]];
        let mut weighted_sum = 0.0f32;
        let mut weight_total = 0.0f32;
        for &(dy, dx, space_weight) in &offsets {
            let ny = reflect_101(y as isize + dy, rows);
            let nx = reflect_101(x as isize + dx, cols);
            let value = mask[[ny, nx]];
            let diff = value - center;
            let weight = space_weight * (diff * diff * color_coeff).exp();
            weighted_sum += value * weight;
            weight_total += weight;
        }
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            center
        }
    })
}

/// 3x3 elliptical structuring element (a cross)
const ELLIPSE_3X3: [(isize, isize); 5] = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)];

fn morphology(mask: &Array2<f32>, take_max: bool) -> Array2<f32> {
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let mut acc = mask[[y, x]];
        for &(dy, dx) in &ELLIPSE_3X3 {
            let ny = y as isize + dy;
            let nx = x as isize + dx;
            if ny < 0 || nx < 0 || ny >= rows as isize || nx >= cols as isize {
                continue;
            }
            let value = mask[[ny as usize, nx as usize]];
            acc = if take_max { acc.max(value) } else { acc.min(value) };
        }
        acc
    })
}

fn dilate(mask: &Array2<f32>) -> Array2<f32> {
    morphology(mask, true)
}

fn erode(mask: &Array2<f32>) -> Array2<f32> {
    morphology(mask, false)
}

/// Fills pinholes smaller than the structuring element
fn morphological_close(mask: &Array2<f32>) -> Array2<f32> {
    erode(&dilate(mask))
}

/// Removes specks smaller than the structuring element
fn morphological_open(mask: &Array2<f32>) -> Array2<f32> {
    dilate(&erode(mask))
}

/// 4-neighbour Laplacian with mirrored borders
fn laplacian(mask: &Array2<f32>) -> Array2<f32> {
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        let up = mask[[reflect_101(y as isize - 1, rows), x]];
        let down = mask[[reflect_101(y as isize + 1, rows), x]];
        let left = mask[[y, reflect_101(x as isize - 1, cols)]];
        let right = mask[[y, reflect_101(x as isize + 1, cols)]];
        up + down + left + right - 4.0 * mask[[y, x]]
    })
}

/// `1.5 * m - 0.5 * laplacian(m)`, clipped to `[0, 1]`
fn sharpen_edges(mask: &Array2<f32>) -> Array2<f32> {
    let lap = laplacian(mask);
    let mut sharpened = mask * 1.5 - &lap * 0.5;
    sharpened.mapv_inplace(|v| v.clamp(0.0, 1.0));
    sharpened
}

/// Normalized 1-D Gaussian kernel; sigma is derived from the aperture
fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    if let Some(fixed) = SMALL_GAUSSIAN_KERNELS.get(ksize / 2) {
        if ksize % 2 == 1 {
            return fixed.to_vec();
        }
    }
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (ksize as f32 - 1.0) * 0.5;
    let scale = -0.5 / (sigma * sigma);
    let mut kernel: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - center;
            (d * d * scale).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable Gaussian blur with mirrored borders
fn gaussian_blur(mask: &Array2<f32>, ksize: usize) -> Array2<f32> {
    let kernel = gaussian_kernel(ksize);
    let half = (ksize / 2) as isize;
    let (rows, cols) = mask.dim();

    let horizontal = Array2::from_shape_fn((rows, cols), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * mask[[y, reflect_101(x as isize + k as isize - half, cols)]])
            .sum::<f32>()
    });

    Array2::from_shape_fn((rows, cols), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * horizontal[[reflect_101(y as isize + k as isize - half, rows), x]])
            .sum::<f32>()
    })
}

/// Stretch values to span `[0, 1]`; a flat mask is left untouched
fn normalize_min_max(mask: &mut Array2<f32>) {
    let (min, max) = mask
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    if !range.is_finite() || range <= f32::EPSILON {
        return;
    }
    mask.mapv_inplace(|v| (v - min) / range);
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn disc_mask(size: u32, radius: f32) -> AlphaMask {
        let center = size as f32 / 2.0;
        let mut data = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 - center;
                let dy = y as f32 - center;
                data.push(if (dx * dx + dy * dy).sqrt() < radius { 255 } else { 0 });
            }
        }
        AlphaMask::new(data, (size, size))
    }

    fn no_feather() -> PipelineConfig {
        PipelineConfig::builder().feather_amount(0).build().unwrap()
    }

    #[test]
    fn test_refine_preserves_dimensions() {
        let cutout = RasterBuffer::solid_rgb(37, 23, [10, 20, 30]);
        let mask = AlphaMask::filled((37, 23), 200);
        let refined = refine(
            &cutout,
            &mask,
            &PipelineConfig::default(),
            RefinementIntensity::UltraHD,
        )
        .unwrap();

        assert_eq!(refined.dimensions(), (37, 23));
        assert!(refined.has_alpha());
    }

    #[test]
    fn test_refine_keeps_rgb_channels() {
        let mut rgb = RgbImage::new(16, 16);
        for (x, y, pixel) in rgb.enumerate_pixels_mut() {
            *pixel = Rgb([x as u8 * 10, y as u8 * 10, 77]);
        }
        let cutout = RasterBuffer::Rgb(rgb.clone());
        let mask = disc_mask(16, 6.0);

        let refined = refine(&cutout, &mask, &no_feather(), RefinementIntensity::Standard)
            .unwrap()
            .to_rgb8();
        assert_eq!(refined, rgb);
    }

    #[test]
    fn test_dimension_mismatch() {
        let cutout = RasterBuffer::solid_rgb(10, 10, [0, 0, 0]);
        let mask = AlphaMask::filled((10, 9), 255);
        let err = refine(
            &cutout,
            &mask,
            &PipelineConfig::default(),
            RefinementIntensity::Standard,
        )
        .unwrap_err();
        assert!(matches!(err, crate::CutoutError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_opaque_interior_survives_single_pass() {
        let size = 64;
        let mut data = vec![255u8; (size * size) as usize];
        // Transparent border band of 4 pixels
        for y in 0..size {
            for x in 0..size {
                if x < 4 || y < 4 || x >= size - 4 || y >= size - 4 {
                    data[(y * size + x) as usize] = 0;
                }
            }
        }
        let mask = AlphaMask::new(data, (size, size));
        let refined = MaskRefiner::new(&no_feather(), RefinementIntensity::Standard)
            .refine_mask(&mask)
            .unwrap();

        for y in 15..(size - 15) {
            for x in 15..(size - 15) {
                assert_eq!(refined.get(x, y), 255, "interior pixel ({x}, {y})");
            }
        }
        assert_eq!(refined.get(0, 0), 0);
    }

    #[test]
    fn test_close_fills_pinhole_and_open_removes_speck() {
        let mut mask = Array2::<f32>::ones((7, 7));
        mask[[3, 3]] = 0.0;
        let closed = morphological_close(&mask);
        assert!((closed[[3, 3]] - 1.0).abs() < f32::EPSILON);

        let mut speck = Array2::<f32>::zeros((7, 7));
        speck[[3, 3]] = 1.0;
        let opened = morphological_open(&speck);
        assert!(opened.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_feather_softens_boundary() {
        let mask = disc_mask(48, 14.0);
        let hard = MaskRefiner::new(&no_feather(), RefinementIntensity::Standard)
            .refine_mask(&mask)
            .unwrap();
        let soft_config = PipelineConfig::builder().feather_amount(5).build().unwrap();
        let soft = MaskRefiner::new(&soft_config, RefinementIntensity::Standard)
            .refine_mask(&mask)
            .unwrap();

        let partial = |m: &AlphaMask| m.data.iter().filter(|&&v| v > 0 && v < 255).count();
        assert!(partial(&soft) > partial(&hard));
        // Min-max normalization keeps the full range
        assert_eq!(soft.data.iter().copied().max(), Some(255));
        assert_eq!(soft.data.iter().copied().min(), Some(0));
    }

    #[test]
    fn test_feather_disabled_flag() {
        let config = PipelineConfig::builder()
            .feather_edges(false)
            .feather_amount(9)
            .build()
            .unwrap();
        let refiner = MaskRefiner::new(&config, RefinementIntensity::UltraHD);
        assert_eq!(refiner.feather_radius, None);
        assert_eq!(refiner.passes(), 3);
    }

    #[test]
    fn test_zero_feather_amount_skips_renormalization() {
        let mask = AlphaMask::new(
            (0..24u32 * 24).map(|i| if i % 24 < 12 { 100 } else { 150 }).collect(),
            (24, 24),
        );
        let feathered_zero = MaskRefiner::new(
            &PipelineConfig::builder()
                .feather_edges(true)
                .feather_amount(0)
                .build()
                .unwrap(),
            RefinementIntensity::Standard,
        );
        assert_eq!(feathered_zero.feather_radius, None);

        let refined = feathered_zero.refine_mask(&mask).unwrap();
        let unfeathered = MaskRefiner::new(
            &PipelineConfig::builder().feather_edges(false).build().unwrap(),
            RefinementIntensity::Standard,
        )
        .refine_mask(&mask)
        .unwrap();
        assert_eq!(refined, unfeathered);
        assert!(refined.data.iter().all(|&v| (100..=150).contains(&v)));
    }

    #[test]
    fn test_flat_mask_is_not_normalized_to_zero() {
        let mask = AlphaMask::filled((12, 12), 128);
        let refined = MaskRefiner::new(&PipelineConfig::default(), RefinementIntensity::Standard)
            .refine_mask(&mask)
            .unwrap();
        assert!(refined.data.iter().all(|&v| v == 128));
    }

    #[test]
    fn test_edge_sharpening_boosts_partial_alpha() {
        // The second pass scales the mask by 1.5, so soft regions gain opacity
        let mask = AlphaMask::filled((12, 12), 100);
        let refined = MaskRefiner::new(&no_feather(), RefinementIntensity::UltraHD)
            .refine_mask(&mask)
            .unwrap();
        assert!(refined.data.iter().all(|&v| v == 150));
    }

    #[test]
    fn test_gaussian_kernel_is_normalized() {
        for ksize in [1usize, 3, 5, 7, 9, 15, 31] {
            let kernel = gaussian_kernel(ksize);
            assert_eq!(kernel.len(), ksize);
            let sum: f32 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "ksize {ksize} sums to {sum}");
        }
    }

    #[test]
    fn test_sharpen_edges_is_clipped() {
        let mut mask = Array2::<f32>::zeros((5, 5));
        mask[[2, 2]] = 1.0;
        let sharpened = sharpen_edges(&mask);
        assert!(sharpened.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((sharpened[[2, 2]] - 1.0).abs() < f32::EPSILON);
    }
}
