//! Single invocation of the removal backend

use crate::{
    error::{BgRemovalError, Result},
    inference::{ModelBackend, ModelSessionHandle},
    types::{ColorMode, ImageArtifact, MattingParams},
};
use std::sync::Arc;

/// Delegates one removal call to the backend; holds no retry logic
#[derive(Clone)]
pub struct RemovalExecutor {
    backend: Arc<dyn ModelBackend>,
}

impl std::fmt::Debug for RemovalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalExecutor").finish_non_exhaustive()
    }
}

impl RemovalExecutor {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend }
    }

    /// Run the backend on `image` with the given session
    ///
    /// # Errors
    /// - Any backend failure, reported as an inference error
    /// - `Validation` passed through when the backend rejects the input
    /// - Output that is not four-channel RGBA
    /// - Output whose dimensions differ from the input
    pub async fn execute(
        &self,
        session: &ModelSessionHandle,
        image: &ImageArtifact,
        matting: &MattingParams,
    ) -> Result<ImageArtifact> {
        let model = session.model_id();
        let output = self
            .backend
            .remove(session, image.image(), matting)
            .await
            .map_err(|e| match e {
                BgRemovalError::Inference { .. } | BgRemovalError::Validation(_) => e,
                other => BgRemovalError::inference(model, other.to_string()),
            })?;

        let mode = ColorMode::from_color_type(output.color());
        if mode != ColorMode::Rgba {
            return Err(BgRemovalError::inference(
                model,
                format!(
                    "unexpected channel count: backend returned {} ({} channels), expected RGBA",
                    mode,
                    mode.channels()
                ),
            ));
        }

        if (output.width(), output.height()) != image.dimensions() {
            return Err(BgRemovalError::inference(
                model,
                format!(
                    "backend returned {}x{} for a {}x{} input",
                    output.width(),
                    output.height(),
                    image.width(),
                    image.height()
                ),
            ));
        }

        let output = match output {
            img @ image::DynamicImage::ImageRgba8(_) => img,
            other => image::DynamicImage::ImageRgba8(other.to_rgba8()),
        };
        Ok(ImageArtifact::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockOutcome, MockSessionLoader, ScriptedBackend};
    use crate::inference::SessionLoader;
    use image::{DynamicImage, RgbImage};

    async fn run(outcome: MockOutcome) -> Result<ImageArtifact> {
        let session = MockSessionLoader::new().load_session("u2net").await.unwrap();
        let executor = RemovalExecutor::new(Arc::new(ScriptedBackend::with_script(&[outcome])));
        let image = ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::new(20, 10)));
        executor
            .execute(&session, &image, &MattingParams::default())
            .await
    }

    #[tokio::test]
    async fn test_execute_returns_rgba() {
        let output = run(MockOutcome::Cutout).await.unwrap();
        assert_eq!(output.color_mode(), ColorMode::Rgba);
        assert_eq!(output.dimensions(), (20, 10));
    }

    #[tokio::test]
    async fn test_backend_failure_is_inference_error() {
        let err = run(MockOutcome::Fail).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference { .. }));
    }

    #[tokio::test]
    async fn test_input_rejection_passes_through() {
        let err = run(MockOutcome::RejectInput).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::Validation(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_channel_count_is_inference_error() {
        let err = run(MockOutcome::NoAlpha).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference { .. }));
        assert!(err.to_string().contains("unexpected channel count"));
    }
}
