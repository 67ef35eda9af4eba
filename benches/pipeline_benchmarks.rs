use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cutout_pipeline::{
    composite::composite,
    enhance::enhance,
    export::export,
    refine::MaskRefiner,
    segmentation::test_utils::MockSegmenter,
    AlphaMask, BackgroundSpec, CutoutPipeline, ExportFormat, PipelineConfig, RasterBuffer,
    RefinementIntensity, RgbColor,
};
use image::{Rgb, RgbImage};

const SIZES: [u32; 3] = [128, 256, 512];

fn photo(size: u32) -> RasterBuffer {
    RasterBuffer::Rgb(RgbImage::from_fn(size, size, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
    }))
}

fn disc_mask(size: u32) -> AlphaMask {
    let center = size as f32 / 2.0;
    let radius = size as f32 / 3.0;
    AlphaMask::new(
        (0..size * size)
            .map(|i| {
                let dx = (i % size) as f32 - center;
                let dy = (i / size) as f32 - center;
                if (dx * dx + dy * dy).sqrt() < radius {
                    240
                } else {
                    12
                }
            })
            .collect(),
        (size, size),
    )
}

fn bench_refinement(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_refinement");
    group.sample_size(10);
    let config = PipelineConfig::default();

    for size in SIZES {
        let mask = disc_mask(size);
        for intensity in [RefinementIntensity::Standard, RefinementIntensity::UltraHD] {
            let refiner = MaskRefiner::new(&config, intensity);
            group.bench_with_input(
                BenchmarkId::new(format!("{intensity:?}"), size),
                &mask,
                |b, mask| b.iter(|| refiner.refine_mask(black_box(mask)).unwrap()),
            );
        }
    }
    group.finish();
}

fn bench_enhance_and_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("enhance_composite");
    for size in SIZES {
        let cutout = RasterBuffer::Rgba(disc_mask(size).apply_to(&photo(size)).unwrap());
        group.bench_with_input(BenchmarkId::new("enhance", size), &cutout, |b, cutout| {
            b.iter(|| enhance(black_box(cutout), 0.5).unwrap());
        });

        let gradient = BackgroundSpec::Gradient {
            start: RgbColor::new(76, 175, 80),
            end: RgbColor::new(33, 150, 243),
        };
        group.bench_with_input(BenchmarkId::new("gradient", size), &cutout, |b, cutout| {
            b.iter(|| composite(black_box(cutout), &gradient).unwrap());
        });
    }
    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    let cutout = RasterBuffer::Rgba(disc_mask(512).apply_to(&photo(512)).unwrap());
    for format in [ExportFormat::Png, ExportFormat::Jpeg, ExportFormat::Tiff] {
        group.bench_function(format.name(), |b| {
            b.iter(|| export(black_box(&cutout), format).unwrap());
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_pipeline");
    group.sample_size(10);
    let pipeline = CutoutPipeline::new();
    let model = MockSegmenter::new();
    let config = PipelineConfig::builder()
        .background(BackgroundSpec::SolidColor(RgbColor::WHITE))
        .contrast_boost(1.1)
        .build()
        .unwrap();

    for size in SIZES {
        let image = photo(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &image, |b, image| {
            b.iter(|| pipeline.process(black_box(image), &model, &config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_refinement,
    bench_enhance_and_composite,
    bench_export,
    bench_full_pipeline
);
criterion_main!(benches);
