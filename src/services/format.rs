//! Output format handling service
//!
//! Keeps the layout rules of each container (which ones carry alpha, what
//! extension and MIME type they use) out of the encoding code.

use crate::{export::ExportFormat, types::RasterBuffer};
use tracing::warn;

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert a buffer to the layout the target container stores
    ///
    /// JPEG drops the alpha channel; PNG and TIFF keep the buffer as-is.
    ///
    /// # Examples
    /// ```rust
    /// use cutout_pipeline::{services::OutputFormatHandler, ExportFormat, RasterBuffer};
    /// use image::{Rgba, RgbaImage};
    ///
    /// let rgba = RasterBuffer::Rgba(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 128])));
    /// let jpeg_ready = OutputFormatHandler::convert_format(&rgba, ExportFormat::Jpeg);
    /// assert!(!jpeg_ready.has_alpha());
    /// ```
    #[must_use]
    pub fn convert_format(image: &RasterBuffer, format: ExportFormat) -> RasterBuffer {
        match (format, image) {
            (ExportFormat::Jpeg, RasterBuffer::Rgba(_)) => {
                Self::warn_if_alpha_dropped(format);
                RasterBuffer::Rgb(image.to_rgb8())
            },
            _ => image.clone(),
        }
    }

    /// Get the appropriate file extension for a given export format
    ///
    /// # Examples
    /// ```rust
    /// use cutout_pipeline::{services::OutputFormatHandler, ExportFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(ExportFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(ExportFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: ExportFormat) -> &'static str {
        match format {
            ExportFormat::Png => "png",
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Tiff => "tiff",
        }
    }

    /// MIME type sent alongside exported bytes
    #[must_use]
    pub fn get_mime_type(format: ExportFormat) -> &'static str {
        match format {
            ExportFormat::Png => "image/png",
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Tiff => "image/tiff",
        }
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: ExportFormat) -> bool {
        match format {
            ExportFormat::Png | ExportFormat::Tiff => true,
            ExportFormat::Jpeg => false,
        }
    }

    fn warn_if_alpha_dropped(format: ExportFormat) {
        if !Self::supports_transparency(format) {
            warn!(
                format = format.name(),
                "Output format does not support transparency; alpha channel dropped"
            );
        }
    }
}
