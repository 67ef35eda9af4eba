//! Error types for cutout pipeline operations

use crate::types::PipelineStage;
use thiserror::Error;

/// Result type alias for cutout pipeline operations
pub type Result<T> = std::result::Result<T, CutoutError>;

/// Error taxonomy for the refinement, compositing and export pipeline
#[derive(Error, Debug)]
pub enum CutoutError {
    /// Malformed or non-image input data (bad data URI, undecodable bytes, etc.)
    #[error("Invalid input: {0}")]
    InvalidInputFormat(String),

    /// Mask and image (or two images) disagree on size
    #[error("Dimension mismatch in {context}: expected {}x{}, got {}x{}", expected.0, expected.1, actual.0, actual.1)]
    DimensionMismatch {
        context: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Compositing was asked to use an alpha channel the foreground does not have
    #[error("Missing alpha channel: {0}")]
    MissingAlphaChannel(String),

    /// Unknown export container or channel layout
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A pipeline stage raised during computation
    #[error("Stage '{stage}' failed: {source}")]
    StageFailure {
        stage: PipelineStage,
        #[source]
        source: Box<CutoutError>,
    },

    /// The segmentation collaborator errored or returned nothing usable
    #[error("Segmentation model error: {0}")]
    ExternalModelFailure(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (temp files, reading masks from disk, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CutoutError {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInputFormat(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat(format.into())
    }

    /// Create a new missing alpha channel error
    pub fn missing_alpha<S: Into<String>>(msg: S) -> Self {
        Self::MissingAlphaChannel(msg.into())
    }

    /// Create a new segmentation model error
    pub fn external_model<S: Into<String>>(msg: S) -> Self {
        Self::ExternalModelFailure(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a dimension mismatch error with the operation that detected it
    pub fn dimension_mismatch<S: Into<String>>(
        context: S,
        expected: (u32, u32),
        actual: (u32, u32),
    ) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Wrap an error raised inside a pipeline stage
    ///
    /// Errors that already carry a stage are returned unchanged so the
    /// originating stage is the one reported.
    #[must_use]
    pub fn stage_failure(stage: PipelineStage, cause: CutoutError) -> Self {
        match cause {
            already @ Self::StageFailure { .. } => already,
            other => Self::StageFailure {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create a file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Name of the stage that failed, if this is a stage failure
    #[must_use]
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::StageFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// HTTP-style status classification for front-ends
    ///
    /// Malformed input maps to 4xx, collaborator failures to 502 and
    /// everything raised while computing to 500. Stage failures are
    /// classified by their cause.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInputFormat(_)
            | Self::DimensionMismatch { .. }
            | Self::MissingAlphaChannel(_)
            | Self::UnsupportedFormat(_)
            | Self::InvalidConfig(_) => 400,
            Self::ExternalModelFailure(_) => 502,
            Self::StageFailure { source, .. } => match source.status_code() {
                502 => 502,
                _ => 500,
            },
            Self::Io(_) | Self::Image(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether the caller sent something the pipeline cannot work with
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
