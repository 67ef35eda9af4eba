//! Image I/O operations service
//!
//! Loading and saving from files, byte buffers, async streams and the
//! `data:` URIs front-ends exchange, kept apart from the pipeline stages.

use crate::{
    error::{CutoutError, Result},
    export::{self, ExportFormat},
    types::RasterBuffer,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Service for handling image input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension is wrong or missing.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use cutout_pipeline::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("portrait.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RasterBuffer> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(CutoutError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(RasterBuffer::from_dynamic(img)),
            Err(e) => {
                debug!(
                    path = %path_ref.display(),
                    error = %e,
                    "Extension-based loading failed, trying content-based detection"
                );
                let data = std::fs::read(path_ref)
                    .map_err(|io_err| CutoutError::file_io_error("read image data", path_ref, &io_err))?;
                Self::load_from_bytes(&data).map_err(|content_err| {
                    CutoutError::invalid_input(format!(
                        "Failed to load '{}' ({} bytes): {}; {}",
                        path_ref.display(),
                        data.len(),
                        e,
                        content_err
                    ))
                })
            },
        }
    }

    /// Encode and save an image, creating parent directories as needed
    pub fn save_image<P: AsRef<Path>>(
        image: &RasterBuffer,
        path: P,
        format: ExportFormat,
    ) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CutoutError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }
        export::save(image, format, path_ref)
    }

    /// Check if a file path has a supported image extension
    #[must_use]
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                matches!(
                    e.to_ascii_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "tiff" | "tif"
                )
            })
            .unwrap_or(false)
    }

    /// Decode raw image bytes
    pub fn load_from_bytes(bytes: &[u8]) -> Result<RasterBuffer> {
        RasterBuffer::decode(bytes)
    }

    /// Read an async stream to the end and decode it
    pub async fn load_from_reader<R: tokio::io::AsyncRead + Unpin>(
        mut reader: R,
    ) -> Result<RasterBuffer> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await?;
        Self::load_from_bytes(&buffer)
    }

    /// Encode `image` and write it to an async sink, returning the byte count
    pub async fn save_to_writer<W: tokio::io::AsyncWrite + Unpin>(
        image: &RasterBuffer,
        mut writer: W,
        format: ExportFormat,
    ) -> Result<u64> {
        use tokio::io::AsyncWriteExt;

        let bytes = export::export(image, format)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(bytes.len() as u64)
    }

    /// Extract the payload of a `data:image/<subtype>;base64,<payload>` URI
    ///
    /// # Errors
    /// - `InvalidInputFormat` for a missing comma, a header without the
    ///   `data:image/` prefix or `;base64` marker, or bad base64
    pub fn decode_data_uri_bytes(uri: &str) -> Result<Vec<u8>> {
        let (header, payload) = uri
            .split_once(',')
            .ok_or_else(|| CutoutError::invalid_input("data URI has no ',' separator"))?;

        let header = header.trim();
        if !header.starts_with("data:image/") {
            return Err(CutoutError::invalid_input(format!(
                "expected a data:image/ URI, got header '{}'",
                header
            )));
        }
        if !header.ends_with(";base64") {
            return Err(CutoutError::invalid_input(format!(
                "data URI must be base64-encoded, got header '{}'",
                header
            )));
        }

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| CutoutError::invalid_input(format!("invalid base64 payload: {}", e)))
    }

    /// Decode a `data:` URI into an image
    pub fn decode_data_uri(uri: &str) -> Result<RasterBuffer> {
        let bytes = Self::decode_data_uri_bytes(uri)?;
        Self::load_from_bytes(&bytes)
    }

    /// Wrap encoded bytes in a `data:` URI
    #[must_use]
    pub fn encode_data_uri(bytes: &[u8], mime_type: &str) -> String {
        format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
    }

    /// Encode an image and wrap it in a `data:` URI
    pub fn image_to_data_uri(image: &RasterBuffer, format: ExportFormat) -> Result<String> {
        let bytes = export::export(image, format)?;
        Ok(Self::encode_data_uri(&bytes, format.mime_type()))
    }
}
