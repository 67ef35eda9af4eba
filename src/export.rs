//! Serialization of the final buffer into PNG, JPEG or TIFF bytes
//!
//! PNG and TIFF are lossless and keep the buffer's layout. JPEG drops alpha
//! and is written at quality 100 with full-resolution chroma.

use crate::{
    error::{CutoutError, Result},
    services::OutputFormatHandler,
    types::RasterBuffer,
};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
    ExtendedColorType, ImageEncoder,
};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tiff::encoder::{colortype, compression::Deflate, TiffEncoder};
use tracing::debug;

/// JPEG quality used for every export
pub const JPEG_QUALITY: u8 = 100;

/// Base name of exported files handed to front-ends
pub const EXPORT_BASENAME: &str = "processed_image";

/// Supported export containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Lossless, fast compression, alpha preserved
    Png,
    /// Quality 100, no chroma subsampling, alpha dropped
    Jpeg,
    /// Deflate-compressed, alpha preserved
    Tiff,
}

impl ExportFormat {
    /// Name front-ends use for the format
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPG",
            Self::Tiff => "TIFF",
        }
    }

    /// Download filename, e.g. `processed_image.png`
    #[must_use]
    pub fn filename(self) -> String {
        format!(
            "{}.{}",
            EXPORT_BASENAME,
            OutputFormatHandler::get_extension(self)
        )
    }

    #[must_use]
    pub fn mime_type(self) -> &'static str {
        OutputFormatHandler::get_mime_type(self)
    }

    /// Guess the format from a file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                CutoutError::unsupported_format(format!(
                    "'{}' has no file extension",
                    path.as_ref().display()
                ))
            })?;
        extension.parse()
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = CutoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PNG" => Ok(Self::Png),
            "JPG" | "JPEG" => Ok(Self::Jpeg),
            "TIFF" | "TIF" => Ok(Self::Tiff),
            other => Err(CutoutError::unsupported_format(format!(
                "'{}' (expected PNG, JPG or TIFF)",
                other
            ))),
        }
    }
}

/// Encode `image` in the given container
///
/// # Errors
/// - `Image` when the codec fails
/// - `Internal` when the TIFF writer fails
pub fn export(image: &RasterBuffer, format: ExportFormat) -> Result<Vec<u8>> {
    let prepared = OutputFormatHandler::convert_format(image, format);
    let (width, height) = prepared.dimensions();
    let mut buffer = Vec::new();

    match format {
        ExportFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(&mut buffer, CompressionType::Fast, FilterType::NoFilter);
            encoder.write_image(prepared.as_raw(), width, height, extended_color(&prepared))?;
        },
        ExportFormat::Jpeg => {
            // image's baseline encoder samples every component at full resolution (4:4:4)
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            encoder.write_image(prepared.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        },
        ExportFormat::Tiff => write_tiff(&prepared, &mut buffer)?,
    }

    debug!(
        format = format.name(),
        width,
        height,
        bytes = buffer.len(),
        "Exported image"
    );
    Ok(buffer)
}

/// Encode and write to `path`
pub fn save<P: AsRef<Path>>(image: &RasterBuffer, format: ExportFormat, path: P) -> Result<()> {
    let bytes = export(image, format)?;
    let path_ref = path.as_ref();
    std::fs::write(path_ref, bytes)
        .map_err(|e| CutoutError::file_io_error("write exported image", path_ref, &e))
}

fn extended_color(image: &RasterBuffer) -> ExtendedColorType {
    match image {
        RasterBuffer::Rgb(_) => ExtendedColorType::Rgb8,
        RasterBuffer::Rgba(_) => ExtendedColorType::Rgba8,
    }
}

fn write_tiff(image: &RasterBuffer, buffer: &mut Vec<u8>) -> Result<()> {
    let (width, height) = image.dimensions();
    let mut cursor = Cursor::new(buffer);
    let mut encoder = TiffEncoder::new(&mut cursor).map_err(tiff_error)?;
    match image {
        RasterBuffer::Rgb(img) => encoder.write_image_with_compression::<colortype::RGB8, _>(
            width,
            height,
            Deflate::default(),
            img.as_raw(),
        ),
        RasterBuffer::Rgba(img) => encoder.write_image_with_compression::<colortype::RGBA8, _>(
            width,
            height,
            Deflate::default(),
            img.as_raw(),
        ),
    }
    .map_err(tiff_error)
}

fn tiff_error(error: tiff::TiffError) -> CutoutError {
    CutoutError::internal(format!("TIFF encoding failed: {}", error))
}

/// An exported file living in its own temporary directory
///
/// The directory and file are removed when the artifact is dropped, whether
/// the response that streamed it succeeded or not.
#[derive(Debug)]
pub struct ExportArtifact {
    dir: tempfile::TempDir,
    path: PathBuf,
    format: ExportFormat,
}

impl ExportArtifact {
    /// Encode `image` and write it to a fresh temporary directory
    pub fn create(image: &RasterBuffer, format: ExportFormat) -> Result<Self> {
        let bytes = export(image, format)?;
        Self::from_bytes(&bytes, format)
    }

    /// Write already-encoded bytes to a fresh temporary directory
    pub fn from_bytes(bytes: &[u8], format: ExportFormat) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("cutout-export-").tempdir()?;
        let path = dir.path().join(format.filename());
        std::fs::write(&path, bytes)
            .map_err(|e| CutoutError::file_io_error("write export artifact", &path, &e))?;
        Ok(Self { dir, path, format })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Read the artifact back for streaming
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| CutoutError::file_io_error("read export artifact", &self.path, &e))
    }
}
