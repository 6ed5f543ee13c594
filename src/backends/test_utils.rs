//! Test utilities and mock backends
//!
//! Mock implementations of [`SessionLoader`] and [`ModelBackend`] that need
//! no model artifacts. Both record their calls so tests can verify how the
//! pipeline drove them, and both can be scripted to fail.

use crate::{
    error::{BgRemovalError, Result},
    inference::{InferenceSession, ModelBackend, ModelSessionHandle, SessionLoader},
    types::MattingParams,
};
use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Session produced by [`MockSessionLoader`]
#[derive(Debug)]
pub struct MockSession {
    model_id: String,
}

impl InferenceSession for MockSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Session loader that counts loads per model
#[derive(Debug, Clone, Default)]
pub struct MockSessionLoader {
    load_counts: Arc<Mutex<HashMap<String, usize>>>,
    /// Remaining forced failures per model
    failures: Arc<Mutex<HashMap<String, usize>>>,
    /// Models that always fail to load
    broken_models: Vec<String>,
    delay: Option<Duration>,
}

impl MockSessionLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `count` loads of `model_id`
    #[must_use]
    pub fn fail_first_loads(self, model_id: &str, count: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(model_id.to_string(), count);
        self
    }

    /// Always fail loads of `model_id`
    #[must_use]
    pub fn broken_model(mut self, model_id: &str) -> Self {
        self.broken_models.push(model_id.to_string());
        self
    }

    /// Sleep before each load completes
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of loads started for `model_id`
    pub fn load_count(&self, model_id: &str) -> usize {
        self.load_counts
            .lock()
            .unwrap()
            .get(model_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionLoader for MockSessionLoader {
    async fn load_session(&self, model_id: &str) -> Result<ModelSessionHandle> {
        *self
            .load_counts
            .lock()
            .unwrap()
            .entry(model_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.broken_models.iter().any(|m| m == model_id) {
            return Err(BgRemovalError::model(format!(
                "Mock artifact for '{}' is corrupt",
                model_id
            )));
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(model_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                },
                _ => false,
            }
        };
        if should_fail {
            return Err(BgRemovalError::model(format!(
                "Mock load of '{}' failed",
                model_id
            )));
        }

        Ok(Arc::new(MockSession {
            model_id: model_id.to_string(),
        }))
    }
}

/// What the scripted backend returns for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
    /// Centered opaque subject on a transparent background
    Cutout,
    /// Every pixel opaque
    Opaque,
    /// Every pixel transparent
    Transparent,
    /// Three-channel output with no alpha
    NoAlpha,
    /// Inference error
    Fail,
    /// The backend refuses the input
    RejectInput,
}

/// Backend that replays a script of outcomes, then defaults to `Cutout`
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    /// Model id of each call, in order
    call_history: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that plays `outcomes` in order
    #[must_use]
    pub fn with_script(outcomes: &[MockOutcome]) -> Self {
        let backend = Self::new();
        backend
            .script
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
        backend
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }
}

/// Centered square subject covering the middle half of the image
pub fn cutout_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
        if inside {
            Rgba([200, 40, 40, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn remove(
        &self,
        session: &ModelSessionHandle,
        image: &DynamicImage,
        _matting: &MattingParams,
    ) -> Result<DynamicImage> {
        self.call_history
            .lock()
            .unwrap()
            .push(session.model_id().to_string());

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Cutout);

        let (width, height) = (image.width(), image.height());
        match outcome {
            MockOutcome::Cutout => Ok(DynamicImage::ImageRgba8(cutout_image(width, height))),
            MockOutcome::Opaque => Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                width,
                height,
                Rgba([10, 10, 10, 255]),
            ))),
            MockOutcome::Transparent => {
                Ok(DynamicImage::ImageRgba8(RgbaImage::new(width, height)))
            },
            MockOutcome::NoAlpha => Ok(DynamicImage::ImageRgb8(image.to_rgb8())),
            MockOutcome::Fail => Err(BgRemovalError::inference(
                session.model_id(),
                "mock inference failure",
            )),
            MockOutcome::RejectInput => Err(BgRemovalError::validation(
                "mock backend cannot handle this input",
            )),
        }
    }
}

/// Helper functions for creating test images
pub mod test_helpers {
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    /// Create a test image with a gradient pattern
    pub fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let r = ((x as f32 / width as f32) * 255.0) as u8;
            let g = ((y as f32 / height as f32) * 255.0) as u8;
            Rgb([r, g, 128])
        });
        DynamicImage::ImageRgb8(img)
    }

    /// Encode an image into the given container
    pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_backend_replays_then_defaults() {
        let backend = ScriptedBackend::with_script(&[MockOutcome::Fail, MockOutcome::Opaque]);
        let session: ModelSessionHandle = Arc::new(MockSession {
            model_id: "u2net".to_string(),
        });
        let image = test_helpers::create_test_image(8, 8);
        let matting = MattingParams::default();

        assert!(backend.remove(&session, &image, &matting).await.is_err());
        let opaque = backend.remove(&session, &image, &matting).await.unwrap();
        assert!(opaque.to_rgba8().pixels().all(|p| p[3] == 255));
        let cutout = backend.remove(&session, &image, &matting).await.unwrap();
        assert_eq!(cutout.to_rgba8().get_pixel(0, 0)[3], 0);

        assert_eq!(backend.get_call_history(), vec!["u2net"; 3]);
    }

    #[tokio::test]
    async fn test_mock_loader_failures() {
        let loader = MockSessionLoader::new()
            .fail_first_loads("a", 1)
            .broken_model("b");

        assert!(loader.load_session("a").await.is_err());
        assert!(loader.load_session("a").await.is_ok());
        assert!(loader.load_session("b").await.is_err());
        assert!(loader.load_session("b").await.is_err());
        assert_eq!(loader.load_count("a"), 2);
        assert_eq!(loader.load_count("b"), 2);
    }
}
