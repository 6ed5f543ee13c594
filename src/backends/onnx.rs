//! ONNX Runtime backend for U2-Net and ISNet segmentation models
//!
//! Implements both halves of the inference seam: [`SessionLoader`] resolves a
//! model identifier through the catalog, makes sure its artifact is cached
//! (downloading on first use) and builds an ONNX Runtime session;
//! [`ModelBackend`] runs a session on an image and composes the cutout.

use crate::cache::ModelCache;
use crate::config::{ExecutionProvider, PipelineConfig};
use crate::download::ModelDownloader;
use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceSession, ModelBackend, ModelSessionHandle, SessionLoader};
use crate::models::{ModelCatalog, ModelInfo};
use crate::types::MattingParams;
use crate::utils::TensorPreprocessor;
use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array2;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Value;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::matting;

/// Loaded ONNX Runtime session for one catalog model
pub struct OnnxSession {
    info: ModelInfo,
    /// Running a session needs exclusive access
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSession")
            .field("model", &self.info.id)
            .finish_non_exhaustive()
    }
}

impl InferenceSession for OnnxSession {
    fn model_id(&self) -> &str {
        &self.info.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl OnnxSession {
    /// Catalog entry the session was loaded from
    #[must_use]
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Predict a mask for `image` at the image's own resolution
    fn predict_mask(&self, image: &DynamicImage) -> Result<image::GrayImage> {
        let model = self.info.id.as_str();
        let inference_start = Instant::now();

        let tensor = TensorPreprocessor::image_to_tensor(image, &self.info.preprocessing)?;
        log::debug!("🚀 Starting inference with input shape: {:?}", tensor.dim());

        let input_value = Value::from_array(tensor).map_err(|e| {
            BgRemovalError::inference(model, format!("Failed to convert input tensor: {e}"))
        })?;

        let prediction = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| BgRemovalError::inference(model, "ONNX session lock poisoned"))?;

            let outputs = session.run(ort::inputs![input_value]).map_err(|e| {
                BgRemovalError::inference(model, format!("ONNX inference failed: {e}"))
            })?;

            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference(model, "No output tensors found"))?;
            let output = outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference(model, "First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(model, format!("Failed to extract output tensor: {e}"))
                })?;

            // First channel of the first batch item
            let shape = output.shape();
            if shape.len() < 2 {
                return Err(BgRemovalError::inference(
                    model,
                    format!("Expected at least 2D output tensor, got {}D", shape.len()),
                ));
            }
            let height = shape.get(shape.len() - 2).copied().unwrap_or(0);
            let width = shape.get(shape.len() - 1).copied().unwrap_or(0);
            let plane: Vec<f32> = output.iter().take(height * width).copied().collect();
            Array2::from_shape_vec((height, width), plane).map_err(|e| {
                BgRemovalError::inference(model, format!("Failed to reshape output tensor: {e}"))
            })?
        };

        let mask =
            TensorPreprocessor::prediction_to_mask(prediction.view(), image.width(), image.height())?;

        log::info!(
            "📊 Inference complete ({}): {:.2}ms",
            model,
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(mask)
    }

    fn remove_blocking(&self, image: &DynamicImage, params: &MattingParams) -> Result<DynamicImage> {
        let mask = self.predict_mask(image)?;
        let rgba = image.to_rgba8();
        Ok(DynamicImage::ImageRgba8(matting::cutout(&rgba, &mask, params)))
    }
}

/// ONNX Runtime backend
#[derive(Debug, Clone)]
pub struct OnnxBackend {
    catalog: ModelCatalog,
    downloader: ModelDownloader,
    auto_download: bool,
    execution_provider: ExecutionProvider,
    intra_threads: usize,
    inter_threads: usize,
}

impl OnnxBackend {
    /// Create a backend using the pipeline's cache and runtime settings
    ///
    /// # Errors
    /// - Model cache cannot be opened
    /// - HTTP client cannot be created
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let cache = ModelCache::open(config.cache_dir.as_deref())?;
        Ok(Self {
            catalog: ModelCatalog::builtin(),
            downloader: ModelDownloader::new(cache)?,
            auto_download: config.auto_download,
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
            inter_threads: config.inter_threads,
        })
    }

    /// Models this backend can load
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Downloader used for missing artifacts
    #[must_use]
    pub fn downloader(&self) -> &ModelDownloader {
        &self.downloader
    }

    /// List all ONNX Runtime execution providers with availability status and descriptions
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    async fn artifact_path(&self, info: &ModelInfo) -> Result<PathBuf> {
        if self.downloader.cache().is_model_cached(info) {
            return Ok(self.downloader.cache().model_path(info));
        }
        if !self.auto_download {
            return Err(BgRemovalError::model(format!(
                "Model '{}' is not cached at {} and automatic download is disabled",
                info.id,
                self.downloader.cache().model_path(info).display()
            )));
        }
        self.downloader.ensure_model(info, false).await
    }

    fn configure_providers(&self, builder: SessionBuilder, model: &str) -> Result<SessionBuilder> {
        let map_err = |e: ort::Error| {
            BgRemovalError::inference(model, format!("Failed to set execution providers: {e}"))
        };

        match self.execution_provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("🚀 CUDA execution provider is available and will be used");
                    providers.push(cuda_provider.build());
                }
                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 CoreML execution provider is available and will be used");
                    providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::debug!("No hardware acceleration available, using CPU");
                    Ok(builder)
                } else {
                    builder.with_execution_providers(providers).map_err(map_err)
                }
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Ok(builder)
            },
            ExecutionProvider::Cuda => {
                let cuda_provider = CUDAExecutionProvider::default();
                if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                    log::info!("Using CUDA execution provider");
                    builder
                        .with_execution_providers([cuda_provider.build()])
                        .map_err(map_err)
                } else {
                    log::warn!(
                        "CUDA execution provider requested but not available, falling back to CPU"
                    );
                    Ok(builder)
                }
            },
            ExecutionProvider::CoreMl => {
                let coreml_provider = CoreMLExecutionProvider::default();
                if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                    log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                    builder
                        .with_execution_providers([CoreMLExecutionProvider::default()
                            .with_subgraphs(true)
                            .build()])
                        .map_err(map_err)
                } else {
                    log::warn!(
                        "CoreML execution provider requested but not available, falling back to CPU"
                    );
                    Ok(builder)
                }
            },
        }
    }

    fn build_session(&self, info: &ModelInfo, path: &Path) -> Result<Session> {
        let model = info.id.as_str();
        let builder = Session::builder()
            .map_err(|e| {
                BgRemovalError::inference(model, format!("Failed to create session builder: {e}"))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::inference(model, format!("Failed to set optimization level: {e}"))
            })?;

        let builder = self.configure_providers(builder, model)?;

        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra_threads = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            cores
        };
        let inter_threads = if self.inter_threads > 0 {
            self.inter_threads
        } else {
            (cores / 4).max(1)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::inference(model, format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::inference(model, format!("Failed to set inter threads: {e}")))?
            .commit_from_file(path)
            .map_err(|e| {
                BgRemovalError::inference(
                    model,
                    format!("Failed to create session from {}: {e}", path.display()),
                )
            })?;

        log::debug!(
            "✅ ONNX Runtime session created: {} ({} intra-op, {} inter-op threads, provider {})",
            model,
            intra_threads,
            inter_threads,
            self.execution_provider
        );
        Ok(session)
    }
}

#[async_trait]
impl SessionLoader for OnnxBackend {
    async fn load_session(&self, model_id: &str) -> Result<ModelSessionHandle> {
        let load_start = Instant::now();
        let info = self.catalog.resolve(model_id)?.clone();
        let path = self.artifact_path(&info).await?;

        let backend = self.clone();
        let session = tokio::task::spawn_blocking(move || {
            let session = backend.build_session(&info, &path)?;
            Ok::<_, BgRemovalError>(OnnxSession {
                info,
                session: Mutex::new(session),
            })
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Session loading task failed: {e}")))??;

        log::info!(
            "📊 Model '{}' loaded in {:.0}ms",
            model_id,
            load_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(Arc::new(session))
    }
}

#[async_trait]
impl ModelBackend for OnnxBackend {
    async fn remove(
        &self,
        session: &ModelSessionHandle,
        image: &DynamicImage,
        matting: &MattingParams,
    ) -> Result<DynamicImage> {
        if session.as_any().downcast_ref::<OnnxSession>().is_none() {
            return Err(BgRemovalError::inference(
                session.model_id(),
                "session was not created by the ONNX backend",
            ));
        }

        let handle = Arc::clone(session);
        let image = image.clone();
        let matting = *matting;
        tokio::task::spawn_blocking(move || {
            let onnx = handle.as_any().downcast_ref::<OnnxSession>().ok_or_else(|| {
                BgRemovalError::inference(handle.model_id(), "session type changed")
            })?;
            onnx.remove_blocking(&image, &matting)
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Inference task failed: {e}")))?
    }
}
