//! Processing pipeline with validation-gated retry and model fallback
//!
//! Stages run in order: [`ImageValidator`] → [`ImagePreprocessor`] →
//! [`RetryFallbackController`] (driving [`RemovalExecutor`] and
//! [`QualityValidator`] through the [`ModelSessionCache`]) → [`PostProcessor`].
//!
//! A pipeline is built once at startup and shared by reference between
//! requests. The session cache is the only state requests share.

pub mod executor;
pub mod postprocess;
pub mod preprocess;
pub mod quality;
pub mod retry;
pub mod validator;

pub use executor::RemovalExecutor;
pub use postprocess::PostProcessor;
pub use preprocess::{ImagePreprocessor, PreparedImage};
pub use quality::{QualityIssue, QualityValidator, QualityVerdict};
pub use retry::{LadderReport, LadderState, RetryFallbackController, MAX_ATTEMPTS};
pub use validator::{ImageValidator, ValidatedImage};

use crate::{
    config::PipelineConfig,
    error::Result,
    inference::{ModelBackend, SessionLoader},
    session_cache::ModelSessionCache,
    types::{
        AttemptRecord, ProcessedImage, ProcessingRequest, ProcessingResult, ProcessingTimings,
        RemovalParams,
    },
};
use instant::Instant;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// End-to-end background removal pipeline
#[derive(Debug)]
pub struct BackgroundRemovalPipeline {
    config: PipelineConfig,
    validator: ImageValidator,
    preprocessor: ImagePreprocessor,
    sessions: Arc<ModelSessionCache>,
    controller: RetryFallbackController,
    postprocessor: PostProcessor,
}

impl BackgroundRemovalPipeline {
    /// Build a pipeline with its own session cache
    ///
    /// # Errors
    /// - Configuration fails validation
    pub fn new(
        config: PipelineConfig,
        loader: Arc<dyn SessionLoader>,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self> {
        let sessions = Arc::new(ModelSessionCache::new(loader, config.session_cache_capacity));
        Self::with_session_cache(config, sessions, backend)
    }

    /// Build a pipeline around an existing session cache
    ///
    /// # Errors
    /// - Configuration fails validation
    pub fn with_session_cache(
        config: PipelineConfig,
        sessions: Arc<ModelSessionCache>,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let controller = RetryFallbackController::new(
            Arc::clone(&sessions),
            RemovalExecutor::new(backend),
            QualityValidator::new(config.transparent_alpha_cutoff, config.max_transparent_ratio),
            config.fallback_model.clone(),
        );

        Ok(Self {
            validator: ImageValidator::new(config.max_upload_bytes),
            preprocessor: ImagePreprocessor::new(config.max_dimension),
            postprocessor: PostProcessor::new(config.edge_refinement, config.edge_blur_sigma)?,
            sessions,
            controller,
            config,
        })
    }

    /// Build a pipeline backed by ONNX Runtime
    ///
    /// # Errors
    /// - Configuration fails validation
    /// - Model cache or HTTP client cannot be created
    #[cfg(feature = "onnx")]
    pub fn onnx(config: PipelineConfig) -> Result<Self> {
        let backend = Arc::new(crate::backends::OnnxBackend::from_config(&config)?);
        Self::new(config, backend.clone(), backend)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Session cache shared by every request through this pipeline
    #[must_use]
    pub fn session_cache(&self) -> &Arc<ModelSessionCache> {
        &self.sessions
    }

    /// Removal parameters using the configured default model
    #[must_use]
    pub fn default_params(&self) -> RemovalParams {
        RemovalParams::for_model(self.config.default_model.clone())
    }

    /// Load the session for `model_id` ahead of the first request
    ///
    /// # Errors
    /// - Session loading failures
    pub async fn warm_up(&self, model_id: &str) -> Result<()> {
        self.sessions.acquire(model_id).await.map(|_| ())
    }

    /// Process raw upload bytes into a result envelope; never panics or errors
    pub async fn process(&self, raw: &[u8], params: &RemovalParams) -> ProcessingResult {
        self.process_upload(raw, None, params).await
    }

    /// Like [`process`](Self::process), with the size the client declared
    pub async fn process_upload(
        &self,
        raw: &[u8],
        declared_size: Option<usize>,
        params: &RemovalParams,
    ) -> ProcessingResult {
        let mut attempts = Vec::new();
        match self.run(raw, declared_size, params, &mut attempts).await {
            Ok(processed) => ProcessingResult::succeeded(processed),
            Err(error) => {
                warn!(stage = error.stage(), error = %error, "processing failed");
                ProcessingResult::failed(&error, attempts)
            },
        }
    }

    /// Process raw upload bytes, returning the error on failure
    ///
    /// # Errors
    /// - `Validation` for oversized, undecodable or unsupported input and bad parameters
    /// - `Exhausted` when every attempt of the ladder failed
    pub async fn try_process(&self, raw: &[u8], params: &RemovalParams) -> Result<ProcessedImage> {
        let mut attempts = Vec::new();
        self.run(raw, None, params, &mut attempts).await
    }

    #[instrument(skip(self, raw, attempts), fields(bytes = raw.len(), model = %params.model))]
    async fn run(
        &self,
        raw: &[u8],
        declared_size: Option<usize>,
        params: &RemovalParams,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<ProcessedImage> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let stage_start = Instant::now();
        params.validate()?;
        let validated = self.validator.validate(raw, declared_size)?;
        let request = ProcessingRequest::new(validated.image, params.clone())?;
        timings.validation_ms = elapsed_ms(stage_start);

        let stage_start = Instant::now();
        let (image, params) = request.into_parts();
        let prepared = self.preprocessor.prepare(image)?;
        timings.preprocessing_ms = elapsed_ms(stage_start);

        let stage_start = Instant::now();
        let report = self
            .controller
            .run(&prepared.image, &params.model, &params.matting)
            .await;
        attempts.clone_from(&report.attempts);
        let accepted = report.into_result()?;
        timings.removal_ms = elapsed_ms(stage_start);

        let stage_start = Instant::now();
        let image = self.postprocessor.finish(accepted.image, &prepared.restoration)?;
        timings.postprocessing_ms = elapsed_ms(stage_start);
        timings.total_ms = elapsed_ms(total_start);

        info!(
            model = %accepted.model,
            attempt = accepted.attempt,
            fallback = accepted.fallback,
            total_ms = timings.total_ms,
            "background removal complete"
        );

        Ok(ProcessedImage {
            image,
            source_format: validated.format,
            source_color_mode: validated.color_mode,
            restoration: prepared.restoration,
            model_used: accepted.model,
            fallback_used: accepted.fallback,
            attempts: std::mem::take(attempts),
            timings,
        })
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{
        test_helpers::{create_test_image, encode},
        MockOutcome, MockSessionLoader, ScriptedBackend,
    };
    use crate::types::{ColorMode, FailureKind};
    use image::ImageFormat;

    fn pipeline(backend: ScriptedBackend) -> BackgroundRemovalPipeline {
        BackgroundRemovalPipeline::new(
            PipelineConfig::default(),
            Arc::new(MockSessionLoader::new()),
            Arc::new(backend),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_png_end_to_end() {
        let raw = encode(&create_test_image(64, 48), ImageFormat::Png);
        let result = pipeline(ScriptedBackend::new())
            .process(&raw, &RemovalParams::default())
            .await;

        assert!(result.success, "{}", result.message);
        let image = result.image.unwrap();
        assert_eq!(image.dimensions(), (64, 48));
        assert_eq!(image.color_mode(), ColorMode::Rgba);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.source_format, Some(ImageFormat::Png));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_backend() {
        let backend = ScriptedBackend::new();
        let result = pipeline(backend.clone())
            .process(b"x", &RemovalParams::default())
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Validation));
        assert!(result.is_client_error());
        assert!(result.attempts.is_empty());
        assert!(backend.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_matting_params_are_validation_errors() {
        let raw = encode(&create_test_image(8, 8), ImageFormat::Png);
        let mut params = RemovalParams::default();
        params.matting.erode_size = 25;
        let err = pipeline(ScriptedBackend::new())
            .try_process(&raw, &params)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_exhausted_result_keeps_attempt_history() {
        let raw = encode(&create_test_image(16, 16), ImageFormat::Png);
        let backend = ScriptedBackend::with_script(&[
            MockOutcome::Fail,
            MockOutcome::Fail,
            MockOutcome::Fail,
        ]);
        let result = pipeline(backend).process(&raw, &RemovalParams::default()).await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Exhausted));
        assert_eq!(result.attempts.len(), 3);
        assert!(result.image.is_none());
    }

    #[tokio::test]
    async fn test_oversized_input_is_restored() {
        let raw = encode(&create_test_image(120, 60), ImageFormat::Png);
        let config = PipelineConfig::builder().max_dimension(50).build().unwrap();
        let pipeline = BackgroundRemovalPipeline::new(
            config,
            Arc::new(MockSessionLoader::new()),
            Arc::new(ScriptedBackend::new()),
        )
        .unwrap();

        let processed = pipeline
            .try_process(&raw, &RemovalParams::default())
            .await
            .unwrap();
        assert_eq!(processed.image.dimensions(), (120, 60));
        assert!(processed.restoration.was_resized());
    }

    #[tokio::test]
    async fn test_warm_up_loads_session_once() {
        let p = pipeline(ScriptedBackend::new());
        p.warm_up("u2net").await.unwrap();
        p.warm_up("u2net").await.unwrap();
        assert!(p.session_cache().contains("u2net"));
        assert_eq!(p.session_cache().stats().loads, 1);
    }
}
