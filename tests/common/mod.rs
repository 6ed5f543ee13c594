//! Shared fixtures for integration tests: in-memory session loader,
//! deterministic segmentation backend and synthetic images.

#![allow(dead_code)]

use async_trait::async_trait;
use bgremove_service::{
    BgRemovalError, InferenceSession, MattingParams, ModelBackend, ModelSessionHandle, Result,
    SessionLoader,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub struct StubSession {
    pub model_id: String,
}

impl InferenceSession for StubSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Session loader that counts loads per model
#[derive(Default)]
pub struct CountingLoader {
    loads: Mutex<HashMap<String, usize>>,
    broken: HashSet<String>,
    delay: Option<Duration>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loading `model_id` always fails
    pub fn broken(mut self, model_id: &str) -> Self {
        self.broken.insert(model_id.to_string());
        self
    }

    /// Every load sleeps for `delay` first
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn load_count(&self, model_id: &str) -> usize {
        self.loads.lock().unwrap().get(model_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SessionLoader for CountingLoader {
    async fn load_session(&self, model_id: &str) -> Result<ModelSessionHandle> {
        *self
            .loads
            .lock()
            .unwrap()
            .entry(model_id.to_string())
            .or_insert(0) += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.contains(model_id) {
            return Err(BgRemovalError::model(format!("cannot load {model_id}")));
        }
        Ok(Arc::new(StubSession {
            model_id: model_id.to_string(),
        }))
    }
}

/// Scripted behaviour for one backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Segment normally
    Segment,
    /// Raise an inference error
    Fail,
    /// Return a fully opaque image
    Opaque,
    /// Return a fully transparent image
    Erase,
    /// Refuse the input as unusable
    Reject,
}

/// Deterministic stand-in for a segmentation model
///
/// A pixel is foreground when its color differs from the top-left corner
/// pixel, so a subject on a plain background segments cleanly. Scripted
/// steps are consumed first; models listed as failing always error.
#[derive(Clone, Default)]
pub struct SyntheticBackend {
    script: Arc<Mutex<VecDeque<Step>>>,
    failing_models: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(steps: &[Step]) -> Self {
        let backend = Self::new();
        backend.script.lock().unwrap().extend(steps.iter().copied());
        backend
    }

    pub fn failing_for(self, model_id: &str) -> Self {
        self.failing_models
            .lock()
            .unwrap()
            .insert(model_id.to_string());
        self
    }

    /// Model id of every call, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for SyntheticBackend {
    async fn remove(
        &self,
        session: &ModelSessionHandle,
        image: &DynamicImage,
        _matting: &MattingParams,
    ) -> Result<DynamicImage> {
        let model = session.model_id().to_string();
        self.calls.lock().unwrap().push(model.clone());

        if self.failing_models.lock().unwrap().contains(&model) {
            return Err(BgRemovalError::inference(model, "synthetic failure"));
        }

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Segment);
        let rgba = image.to_rgba8();

        match step {
            Step::Fail => Err(BgRemovalError::inference(model, "scripted failure")),
            Step::Reject => Err(BgRemovalError::validation("image has no usable subject")),
            Step::Opaque => Ok(DynamicImage::ImageRgba8(rgba)),
            Step::Erase => Ok(DynamicImage::ImageRgba8(RgbaImage::from_fn(
                rgba.width(),
                rgba.height(),
                |x, y| {
                    let Rgba([r, g, b, _]) = *rgba.get_pixel(x, y);
                    Rgba([r, g, b, 0])
                },
            ))),
            Step::Segment => {
                let background = *rgba.get_pixel(0, 0);
                Ok(DynamicImage::ImageRgba8(RgbaImage::from_fn(
                    rgba.width(),
                    rgba.height(),
                    |x, y| {
                        let Rgba([r, g, b, _]) = *rgba.get_pixel(x, y);
                        let distance = [r, g, b]
                            .iter()
                            .zip(background.0.iter())
                            .map(|(a, b)| a.abs_diff(*b) as u32)
                            .sum::<u32>();
                        Rgba([r, g, b, if distance > 60 { 255 } else { 0 }])
                    },
                )))
            },
        }
    }
}

/// Solid red square centred on a white background
pub fn subject_on_background(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let inside =
            x >= width / 4 && x < width * 3 / 4 && y >= height / 4 && y < height * 3 / 4;
        if inside {
            Rgb([220, 30, 30])
        } else {
            Rgb([255, 255, 255])
        }
    }))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}
