//! Request/response shapes for front-ends
//!
//! Front-ends exchange images as `data:` URIs and settings as a loose JSON
//! map. The handlers here decode those, drive [`CutoutPipeline`] and return
//! either a response body or an [`ApiError`] carrying an HTTP-style status.

use crate::{
    config::ProcessSettings,
    error::CutoutError,
    export::{ExportArtifact, ExportFormat},
    pipeline::CutoutPipeline,
    segmentation::SegmentationModel,
    services::ImageIOService,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Body of a process request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Input image as a `data:image/...;base64,` URI
    pub image: String,
    /// Settings map; `null` or missing means front-end defaults
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Successful process response; `image` is always a PNG data URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub image: String,
}

/// Error envelope returned to front-ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Body of an export request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub image: String,
    /// `PNG`, `JPG` or `TIFF` (case-insensitive)
    pub format: String,
}

/// Encoded export ready to stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportResponse {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// A failed request with its status classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// The `{ success: false, error }` body
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: self.message.clone(),
        }
    }
}

impl From<CutoutError> for ApiError {
    fn from(error: CutoutError) -> Self {
        Self {
            status: error.status_code(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for ApiError {}

fn settings_from_value(value: serde_json::Value) -> Result<ProcessSettings, CutoutError> {
    if value.is_null() {
        return Ok(ProcessSettings::default());
    }
    ProcessSettings::from_json(value)
}

/// Decode, run the pipeline and return the result as a PNG data URI
///
/// # Errors
/// - 400 for undecodable images and invalid settings
/// - 502 when the segmentation model fails
/// - 500 for any other stage failure
#[instrument(skip(pipeline, model, request), fields(model = %model.name()))]
pub fn handle_process_request(
    pipeline: &CutoutPipeline,
    model: &dyn SegmentationModel,
    request: ProcessRequest,
) -> Result<ProcessResponse, ApiError> {
    let result = (|| {
        let image = ImageIOService::decode_data_uri(&request.image)?;
        let config = settings_from_value(request.settings)?.into_config()?;
        debug!(
            width = image.width(),
            height = image.height(),
            quality = %config.quality,
            background = config.background.kind(),
            "Decoded process request"
        );

        let output = pipeline.process(&image, model, &config)?;
        ImageIOService::image_to_data_uri(&output.image, ExportFormat::Png)
    })();

    match result {
        Ok(image) => {
            info!("Process request completed");
            Ok(ProcessResponse {
                success: true,
                image,
            })
        },
        Err(e) => {
            warn!(error = %e, status = e.status_code(), "Process request failed");
            Err(e.into())
        },
    }
}

/// [`handle_process_request`] on tokio's blocking pool
pub async fn handle_process_request_async(
    pipeline: CutoutPipeline,
    model: Arc<dyn SegmentationModel>,
    request: ProcessRequest,
) -> Result<ProcessResponse, ApiError> {
    tokio::task::spawn_blocking(move || {
        handle_process_request(&pipeline, model.as_ref(), request)
    })
    .await
    .map_err(|e| ApiError::from(CutoutError::internal(format!("request task failed: {}", e))))?
}

/// Encode the image in the requested container
///
/// The bytes pass through a temporary file that is removed before this
/// returns, whether or not reading it back succeeded.
///
/// # Errors
/// - 400 for an undecodable image or an unknown format
/// - 500 when encoding or the temporary file fails
#[instrument(skip(request), fields(format = %request.format))]
pub fn handle_export_request(request: ExportRequest) -> Result<ExportResponse, ApiError> {
    let format: ExportFormat = request.format.parse()?;
    let image = ImageIOService::decode_data_uri(&request.image)?;

    let artifact = ExportArtifact::create(&image, format)?;
    debug!(path = %artifact.path().display(), "Export written to temporary file");
    let bytes = artifact.read()?;
    drop(artifact);

    Ok(ExportResponse {
        bytes,
        mime_type: format.mime_type().to_string(),
        filename: format.filename(),
    })
}
