//! Cutout pipeline CLI
//!
//! Runs the refinement and compositing pipeline over files or directories,
//! using either a precomputed mask or each input's own alpha channel as the
//! segmentation.

use super::config::CliConfigBuilder;
use crate::{
    config::PipelineConfig,
    export::ExportFormat,
    pipeline::{CutoutPipeline, PipelineJob},
    segmentation::SegmentationModel,
    services::{ImageIOService, OutputFormatHandler, TracingProgressReporter},
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use instant::Instant;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "tiff", "tif"];

/// Refine, composite and export segmentation cutouts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "cutout-pipeline")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Output file (single input) or directory (batch processing)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// Precomputed mask (grayscale) used instead of the input's alpha channel
    #[arg(long, value_name = "MASK")]
    pub mask: Option<PathBuf>,

    /// JSON settings file in the front-end settings format
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Quality profile: Draft, Good, High or "Ultra HD" [default: Ultra HD]
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Segmentation model variant requested from the collaborator
    #[arg(short, long)]
    pub model: Option<String>,

    /// Override the refinement intensity implied by the quality profile
    #[arg(long, value_enum)]
    pub intensity: Option<CliIntensity>,

    /// Skip mask refinement
    #[arg(long)]
    pub no_edge_refinement: bool,

    /// Do not ask the model to post-process its mask
    #[arg(long)]
    pub no_preserve_details: bool,

    /// Skip detail enhancement
    #[arg(long)]
    pub no_enhance_details: bool,

    /// Double resolution for inputs under 4000px
    #[arg(long)]
    pub super_resolution: bool,

    /// Double resolution for inputs under 2000px
    #[arg(long)]
    pub upscale_small: bool,

    /// Disable edge feathering
    #[arg(long)]
    pub no_feather: bool,

    /// Feather kernel size (0-255)
    #[arg(long)]
    pub feather_amount: Option<u32>,

    /// Matting foreground threshold (0-255)
    #[arg(long)]
    pub matting_foreground: Option<u8>,

    /// Matting background threshold (0-255)
    #[arg(long)]
    pub matting_background: Option<u8>,

    /// Matting erode size
    #[arg(long)]
    pub matting_erode: Option<u32>,

    /// Contrast multiplier applied after compositing (1.0 = unchanged)
    #[arg(long)]
    pub contrast: Option<f32>,

    /// Extra sharpening (0.0 = none)
    #[arg(long)]
    pub sharpness: Option<f32>,

    /// Background: transparent, a color (#RRGGBB), gradient:<start>,<end> or an image path
    #[arg(short, long)]
    pub background: Option<String>,

    /// Blend mask used for gradient backgrounds
    #[arg(long, value_enum)]
    pub gradient_blend: Option<CliGradientBlend>,

    /// Fail instead of treating alpha-less cutouts as opaque
    #[arg(long)]
    pub reject_missing_alpha: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Filename pattern for directory inputs (e.g., "*.png")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Number of images processed concurrently [default: available cores]
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    #[value(alias = "jpeg")]
    Jpg,
    #[value(alias = "tif")]
    Tiff,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliIntensity {
    Standard,
    UltraHd,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliGradientBlend {
    Alpha,
    Luminance,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let model = CliConfigBuilder::segmenter(&cli)?;
    let format = CliConfigBuilder::export_format(&cli);

    let session_id = uuid::Uuid::new_v4().to_string();
    let quality = config.quality.to_string();
    let session = spans::session(&session_id, &quality);

    info!(
        parent: &session,
        inputs = %cli.input.join(", "),
        model = model.name(),
        format = format.name(),
        background = config.background.kind(),
        "Starting cutout pipeline CLI"
    );

    let start = Instant::now();
    let summary = process_inputs(&cli, &config, model, format)
        .instrument(session.clone())
        .await?;
    info!(
        parent: &session,
        processed = summary.processed,
        failed = summary.failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Done"
    );

    if summary.failed > 0 && summary.processed == 0 {
        anyhow::bail!("All {} input(s) failed to process", summary.failed);
    }
    Ok(())
}

/// Outcome of a batch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

async fn process_inputs(
    cli: &Cli,
    config: &PipelineConfig,
    model: Arc<dyn SegmentationModel>,
    format: ExportFormat,
) -> Result<BatchSummary> {
    let files = collect_input_files(&cli.input, cli.recursive, cli.pattern.as_deref())?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(BatchSummary::default());
    }
    info!("Found {} image file(s) to process", files.len());

    let output_dir = prepare_output_dir(cli.output.as_deref(), files.len())?;
    let jobs = cli.jobs.unwrap_or_else(default_jobs).max(1);
    let pipeline =
        CutoutPipeline::with_reporter(Arc::new(TracingProgressReporter::new(cli.verbose > 0)));

    let progress_bar = if cli.progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut summary = BatchSummary::default();

    for chunk in files.chunks(jobs) {
        let mut pending = Vec::with_capacity(chunk.len());
        let mut batch = Vec::with_capacity(chunk.len());

        for path in chunk {
            match ImageIOService::load_image(path) {
                Ok(image) => {
                    pending.push(path.clone());
                    batch.push(PipelineJob {
                        image,
                        config: config.clone(),
                    });
                },
                Err(e) => {
                    error!("Failed to load {}: {}", path.display(), e);
                    summary.failed += 1;
                    if let Some(pb) = &progress_bar {
                        pb.inc(1);
                    }
                },
            }
        }

        let results = pipeline
            .process_concurrently(Arc::clone(&model), batch)
            .instrument(spans::batch_processing(pending.len()))
            .await;

        for (path, result) in pending.iter().zip(results) {
            let _file = spans::file_processing(path, format.name()).entered();
            if let Some(pb) = &progress_bar {
                pb.set_message(format!("{}", path.display()));
            }

            let output_path = output_path_for(path, cli.output.as_deref(), output_dir.as_deref(), format);
            let outcome = result
                .map_err(anyhow::Error::from)
                .and_then(|mut output| {
                    let bytes = output.export(format)?;
                    write_output(&output_path, &bytes)?;
                    debug!(timings = %output.timings.summary(), "Stage timings");
                    Ok(())
                });

            match outcome {
                Ok(()) => {
                    summary.processed += 1;
                    info!("Processed {} -> {}", path.display(), output_path.display());
                },
                Err(e) => {
                    summary.failed += 1;
                    error!("Failed to process {}: {:#}", path.display(), e);
                },
            }

            if let Some(pb) = &progress_bar {
                pb.inc(1);
            }
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_with_message(format!(
            "Completed! Processed: {}, Failed: {}",
            summary.processed, summary.failed
        ));
    }
    if summary.failed > 0 {
        warn!(
            "Some files failed to process. Processed: {}, Failed: {}",
            summary.processed, summary.failed
        );
    }

    Ok(summary)
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Expand file and directory inputs into a sorted list of image files
fn collect_input_files(
    inputs: &[String],
    recursive: bool,
    pattern: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_file() {
            if is_image_file(&path) {
                files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            files.extend(find_image_files(&path, recursive, pattern)?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

/// Create the batch output directory when several files are processed
fn prepare_output_dir(output: Option<&str>, file_count: usize) -> Result<Option<PathBuf>> {
    if file_count < 2 {
        return Ok(None);
    }
    let Some(output) = output else {
        return Ok(None);
    };

    let output_path = PathBuf::from(output);
    if output_path.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            output_path.display()
        );
    }
    std::fs::create_dir_all(&output_path).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;
    Ok(Some(output_path))
}

/// `<stem>_cutout.<ext>` next to the input or inside the output directory
fn generate_output_path(input_path: &Path, dir: Option<&Path>, format: ExportFormat) -> PathBuf {
    let stem = input_path.file_stem().unwrap_or_default();
    let dir = dir.unwrap_or_else(|| input_path.parent().unwrap_or(Path::new(".")));
    dir.join(format!(
        "{}_cutout.{}",
        stem.to_string_lossy(),
        OutputFormatHandler::get_extension(format)
    ))
}

fn output_path_for(
    input_path: &Path,
    single_output: Option<&str>,
    output_dir: Option<&Path>,
    format: ExportFormat,
) -> PathBuf {
    match (output_dir, single_output) {
        (Some(dir), _) => generate_output_path(input_path, Some(dir), format),
        (None, Some(output)) => PathBuf::from(output),
        (None, None) => generate_output_path(input_path, None, format),
    }
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}
