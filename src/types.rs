//! Core types flowing through the background removal pipeline

use crate::error::{BgRemovalError, Result};
use crate::utils::NumericValidator;
use chrono::{DateTime, Utc};
use image::{ColorType, DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

/// Model requested when the caller does not name one
pub const DEFAULT_MODEL: &str = "isnet-general-use";

/// Channel layout of a decoded raster image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    /// Single channel greyscale
    Luma,
    /// Greyscale with alpha
    LumaAlpha,
    /// Three channel color
    Rgb,
    /// Three channel color with alpha
    Rgba,
}

impl ColorMode {
    /// Classify an image crate color type, folding bit depth away
    #[must_use]
    pub fn from_color_type(color: ColorType) -> Self {
        match color {
            ColorType::L8 | ColorType::L16 => Self::Luma,
            ColorType::La8 | ColorType::La16 => Self::LumaAlpha,
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => Self::Rgba,
            _ => Self::Rgb,
        }
    }

    /// Number of channels
    #[must_use]
    pub fn channels(self) -> u8 {
        match self {
            Self::Luma => 1,
            Self::LumaAlpha => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
        }
    }

    /// Whether the layout carries an alpha channel
    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::LumaAlpha | Self::Rgba)
    }
}

impl std::fmt::Display for ColorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Luma => write!(f, "L"),
            Self::LumaAlpha => write!(f, "LA"),
            Self::Rgb => write!(f, "RGB"),
            Self::Rgba => write!(f, "RGBA"),
        }
    }
}

/// A decoded raster image owned by exactly one pipeline stage at a time
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    image: DynamicImage,
}

impl ImageArtifact {
    /// Wrap a decoded image
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Width and height
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        ColorMode::from_color_type(self.image.color())
    }

    /// Borrow the underlying image
    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Raw pixel buffer in the image's native layout
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        self.image.as_bytes()
    }

    /// Give up the wrapper and return the image
    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Encode as PNG, preserving the alpha channel
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

impl From<DynamicImage> for ImageArtifact {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Alpha matting and mask refinement parameters passed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattingParams {
    /// Produce graduated transparency at the subject boundary
    pub enabled: bool,
    /// Mask values above this are treated as certain foreground (1-255)
    pub foreground_threshold: u8,
    /// Mask values below this are treated as certain background (1-255)
    pub background_threshold: u8,
    /// Erosion applied to the certain regions before matting (1-20)
    pub erode_size: u8,
    /// Clean up the raw mask with morphological opening and smoothing
    pub post_process_mask: bool,
}

impl Default for MattingParams {
    fn default() -> Self {
        Self {
            enabled: true,
            foreground_threshold: 232,
            background_threshold: 50,
            erode_size: 20,
            post_process_mask: true,
        }
    }
}

impl MattingParams {
    /// Check every parameter is inside its documented range
    ///
    /// # Errors
    /// - Threshold outside 1-255
    /// - Erode size outside 1-20
    pub fn validate(&self) -> Result<()> {
        NumericValidator::validate_range(self.foreground_threshold, 1, 255, "foreground threshold")?;
        NumericValidator::validate_range(self.background_threshold, 1, 255, "background threshold")?;
        NumericValidator::validate_range(self.erode_size, 1, 20, "erode size")?;
        Ok(())
    }
}

/// Caller-facing removal parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemovalParams {
    /// Model identifier to try first
    pub model: String,
    /// Matting parameters
    pub matting: MattingParams,
}

impl Default for RemovalParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            matting: MattingParams::default(),
        }
    }
}

impl RemovalParams {
    /// Parameters for the given model with default matting
    #[must_use]
    pub fn for_model<S: Into<String>>(model: S) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Replace the matting parameters
    #[must_use]
    pub fn with_matting(mut self, matting: MattingParams) -> Self {
        self.matting = matting;
        self
    }

    /// Validate model identifier and matting parameters
    ///
    /// # Errors
    /// - Empty model identifier
    /// - Matting parameters out of range
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(BgRemovalError::validation("model identifier must not be empty"));
        }
        self.matting.validate()
    }
}

/// An image plus validated parameters; immutable once constructed
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    image: ImageArtifact,
    params: RemovalParams,
}

impl ProcessingRequest {
    /// Build a request, validating the parameters
    ///
    /// # Errors
    /// - Invalid parameters (see [`RemovalParams::validate`])
    pub fn new(image: ImageArtifact, params: RemovalParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { image, params })
    }

    #[must_use]
    pub fn image(&self) -> &ImageArtifact {
        &self.image
    }

    #[must_use]
    pub fn params(&self) -> &RemovalParams {
        &self.params
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.params.model
    }

    #[must_use]
    pub fn matting(&self) -> &MattingParams {
        &self.params.matting
    }

    /// Split into owned parts
    #[must_use]
    pub fn into_parts(self) -> (ImageArtifact, RemovalParams) {
        (self.image, self.params)
    }
}

/// Geometry captured before downsizing so the output can be restored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestorationInfo {
    /// Width of the caller's image
    pub original_width: u32,
    /// Height of the caller's image
    pub original_height: u32,
    /// Factor applied to both dimensions (1.0 when not resized)
    pub scale: f32,
}

impl RestorationInfo {
    /// Geometry for an image that was not resized
    #[must_use]
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            original_width: width,
            original_height: height,
            scale: 1.0,
        }
    }

    #[must_use]
    pub fn original_dimensions(&self) -> (u32, u32) {
        (self.original_width, self.original_height)
    }

    /// Whether preprocessing shrank the image
    #[must_use]
    pub fn was_resized(&self) -> bool {
        self.scale < 1.0
    }
}

/// Why a single attempt did not produce an accepted image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Result executed cleanly and passed the quality gate
    Accepted,
    /// Session acquisition or inference failed
    InferenceFailed(String),
    /// Result was produced but rejected by the quality gate
    QualityRejected(String),
    /// The backend refused the caller's input; the ladder stops here
    InputRejected(String),
}

impl AttemptOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl From<&BgRemovalError> for AttemptOutcome {
    fn from(error: &BgRemovalError) -> Self {
        match error {
            BgRemovalError::QualityRejected { reason, .. } => Self::QualityRejected(reason.clone()),
            BgRemovalError::Inference { message, .. } => Self::InferenceFailed(message.clone()),
            BgRemovalError::Validation(message) => Self::InputRejected(message.clone()),
            other => Self::InferenceFailed(other.to_string()),
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::InferenceFailed(reason) => write!(f, "inference failed: {}", reason),
            Self::QualityRejected(reason) => write!(f, "quality rejected: {}", reason),
            Self::InputRejected(reason) => write!(f, "input rejected: {}", reason),
        }
    }
}

/// History entry for one rung of the attempt ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u8,
    /// Model used for this attempt
    pub model: String,
    /// Whether the attempt used the fallback model
    pub fallback: bool,
    /// What happened
    pub outcome: AttemptOutcome,
    /// Wall time spent on the attempt
    pub elapsed_ms: u64,
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt {} ({}{}): {}",
            self.attempt,
            self.model,
            if self.fallback { ", fallback" } else { "" },
            self.outcome
        )
    }
}

/// Per-stage timings in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub validation_ms: u64,
    pub preprocessing_ms: u64,
    pub removal_ms: u64,
    pub postprocessing_ms: u64,
    pub total_ms: u64,
}

/// A fully validated and post-processed removal result
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// RGBA output at the caller's original resolution
    pub image: ImageArtifact,
    /// Container format of the caller's input
    pub source_format: ImageFormat,
    /// Color mode of the caller's input
    pub source_color_mode: ColorMode,
    /// Geometry restored by post-processing
    pub restoration: RestorationInfo,
    /// Model whose output was accepted
    pub model_used: String,
    /// Whether the accepted output came from the fallback model
    pub fallback_used: bool,
    /// Full attempt history, including the accepted attempt
    pub attempts: Vec<AttemptRecord>,
    /// Stage timings
    pub timings: ProcessingTimings,
}

/// Classification of a failed request for front ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad input; map to a client error
    Validation,
    /// Every attempt failed; map to a server error
    Exhausted,
    /// Unexpected failure outside the ladder; map to a server error
    Internal,
}

/// Outcome of one `process` call, produced once and not retained
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Whether `image` carries an accepted output
    pub success: bool,
    /// RGBA output, present exactly when `success` is true
    pub image: Option<ImageArtifact>,
    /// Human readable diagnostic
    pub message: String,
    /// Failure classification when `success` is false
    pub failure: Option<FailureKind>,
    /// Attempt history (empty when the request failed before the ladder)
    pub attempts: Vec<AttemptRecord>,
    /// Model whose output was accepted
    pub model_used: Option<String>,
    /// Whether the fallback model produced the output
    pub fallback_used: bool,
    /// Container format of the input, when it could be decoded
    pub source_format: Option<ImageFormat>,
    /// Stage timings
    pub timings: ProcessingTimings,
    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Build a successful result
    #[must_use]
    pub fn succeeded(processed: ProcessedImage) -> Self {
        let message = if processed.fallback_used {
            format!(
                "Background removed successfully using fallback model '{}' after {} failed attempt(s)",
                processed.model_used,
                processed.attempts.len().saturating_sub(1)
            )
        } else if processed.attempts.len() > 1 {
            format!(
                "Background removed successfully on attempt {} with model '{}'",
                processed.attempts.len(),
                processed.model_used
            )
        } else {
            "Background removed successfully".to_string()
        };

        Self {
            success: true,
            image: Some(processed.image),
            message,
            failure: None,
            attempts: processed.attempts,
            model_used: Some(processed.model_used),
            fallback_used: processed.fallback_used,
            source_format: Some(processed.source_format),
            timings: processed.timings,
            completed_at: Utc::now(),
        }
    }

    /// Build a failed result from the error that ended processing
    #[must_use]
    pub fn failed(error: &BgRemovalError, attempts: Vec<AttemptRecord>) -> Self {
        let failure = match error {
            BgRemovalError::Validation(_) => FailureKind::Validation,
            BgRemovalError::Exhausted { .. } => FailureKind::Exhausted,
            _ => FailureKind::Internal,
        };

        Self {
            success: false,
            image: None,
            message: error.to_string(),
            failure: Some(failure),
            attempts,
            model_used: None,
            fallback_used: false,
            source_format: None,
            timings: ProcessingTimings::default(),
            completed_at: Utc::now(),
        }
    }

    /// Whether the failure should be reported as the caller's fault
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.failure == Some(FailureKind::Validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_color_mode_classification() {
        assert_eq!(ColorMode::from_color_type(ColorType::L8), ColorMode::Luma);
        assert_eq!(ColorMode::from_color_type(ColorType::La16), ColorMode::LumaAlpha);
        assert_eq!(ColorMode::from_color_type(ColorType::Rgb16), ColorMode::Rgb);
        assert_eq!(ColorMode::from_color_type(ColorType::Rgba8), ColorMode::Rgba);
        assert!(ColorMode::Rgba.has_alpha());
        assert!(!ColorMode::Rgb.has_alpha());
        assert_eq!(ColorMode::Rgba.channels(), 4);
    }

    #[test]
    fn test_matting_defaults_match_service_defaults() {
        let matting = MattingParams::default();
        assert!(matting.enabled);
        assert_eq!(matting.foreground_threshold, 232);
        assert_eq!(matting.background_threshold, 50);
        assert_eq!(matting.erode_size, 20);
        assert!(matting.post_process_mask);
        assert!(matting.validate().is_ok());
    }

    #[test]
    fn test_matting_range_validation() {
        let mut matting = MattingParams::default();
        matting.erode_size = 21;
        assert!(matting.validate().unwrap_err().is_client_error());

        let mut matting = MattingParams::default();
        matting.foreground_threshold = 0;
        assert!(matting.validate().is_err());

        let mut matting = MattingParams::default();
        matting.background_threshold = 0;
        assert!(matting.validate().is_err());
    }

    #[test]
    fn test_request_rejects_empty_model() {
        let image = ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            2,
            2,
            Rgb([0, 0, 0]),
        )));
        let err = ProcessingRequest::new(image, RemovalParams::for_model("  ")).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_attempt_outcome_from_error() {
        let outcome = AttemptOutcome::from(&BgRemovalError::quality_rejected("u2net", "uniform"));
        assert_eq!(outcome, AttemptOutcome::QualityRejected("uniform".to_string()));

        let outcome = AttemptOutcome::from(&BgRemovalError::inference("u2net", "oom"));
        assert_eq!(outcome, AttemptOutcome::InferenceFailed("oom".to_string()));

        let outcome = AttemptOutcome::from(&BgRemovalError::validation("too dark"));
        assert_eq!(outcome.to_string(), "input rejected: too dark");

        let outcome = AttemptOutcome::from(&BgRemovalError::model("corrupt artifact"));
        assert!(matches!(outcome, AttemptOutcome::InferenceFailed(_)));
    }

    #[test]
    fn test_attempt_record_display() {
        let record = AttemptRecord {
            attempt: 3,
            model: "u2net".to_string(),
            fallback: true,
            outcome: AttemptOutcome::QualityRejected("no transparency".to_string()),
            elapsed_ms: 12,
        };
        assert_eq!(
            record.to_string(),
            "attempt 3 (u2net, fallback): quality rejected: no transparency"
        );
    }

    #[test]
    fn test_failed_result_classification() {
        let result = ProcessingResult::failed(&BgRemovalError::validation("bad"), Vec::new());
        assert!(!result.success);
        assert!(result.image.is_none());
        assert!(result.is_client_error());

        let result = ProcessingResult::failed(
            &BgRemovalError::Exhausted {
                attempts: 3,
                summary: "x".to_string(),
            },
            Vec::new(),
        );
        assert_eq!(result.failure, Some(FailureKind::Exhausted));
        assert!(!result.is_client_error());
    }

    #[test]
    fn test_restoration_info() {
        let info = RestorationInfo::identity(10, 20);
        assert!(!info.was_resized());
        assert_eq!(info.original_dimensions(), (10, 20));
    }
}
