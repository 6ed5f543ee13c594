//! Error types for background removal operations
//!
//! The taxonomy mirrors how failures travel through the pipeline:
//! validation failures are surfaced immediately, inference failures and
//! quality rejections are retried by the attempt ladder, and `Exhausted`
//! is the terminal state once the ladder has run out of attempts.

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error types for background removal operations
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Bad input: too large, undecodable, unsupported container or out-of-range parameter
    #[error("Validation error: {0}")]
    Validation(String),

    /// The inference backend failed or produced an unusable image
    #[error("Inference error ({model}): {message}")]
    Inference { model: String, message: String },

    /// The backend produced an image that failed the quality gate
    #[error("Quality rejected ({model}): {reason}")]
    QualityRejected { model: String, reason: String },

    /// All attempts of the retry ladder failed
    #[error("Background removal failed after {attempts} attempts: {summary}")]
    Exhausted { attempts: usize, summary: String },

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image codec errors outside of input validation (encoding results, resizing)
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Model catalog, artifact or session errors
    #[error("Model error: {0}")]
    Model(String),

    /// Network errors while fetching model artifacts
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new inference error for the given model
    pub fn inference<M: Into<String>, S: Into<String>>(model: M, msg: S) -> Self {
        Self::Inference {
            model: model.into(),
            message: msg.into(),
        }
    }

    /// Create a new quality rejection for the given model
    pub fn quality_rejected<M: Into<String>, S: Into<String>>(model: M, reason: S) -> Self {
        Self::QualityRejected {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create network error with context
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
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

    /// Whether the failure was caused by the caller's input
    ///
    /// Front ends map client errors to 4xx responses and everything else to 5xx.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the attempt ladder treats this failure as retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Inference { .. } | Self::QualityRejected { .. } | Self::Model(_) | Self::Network(_)
        )
    }

    /// Name of the pipeline stage this error belongs to
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Inference { .. } | Self::Model(_) | Self::Network(_) => "inference",
            Self::QualityRejected { .. } => "quality",
            Self::Exhausted { .. } => "retry",
            Self::Io(_) | Self::Image(_) => "io",
            Self::InvalidConfig(_) => "configuration",
            Self::Internal(_) => "internal",
        }
    }
}
