#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # bgremove-service
//!
//! Background removal for U2-Net and ISNet ONNX models, wrapped in a
//! processing pipeline that validates uploads, bounds their size, retries
//! failed or implausible results and falls back to a second model before
//! giving up.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ─▶ ImageValidator ─▶ ImagePreprocessor ─▶ RetryFallbackController ─▶ PostProcessor ─▶ ProcessingResult
//!                                                   │  ▲
//!                                                   ▼  │ QualityValidator
//!                                   ModelSessionCache ─▶ RemovalExecutor ─▶ ModelBackend
//! ```
//!
//! Each request makes at most three attempts: two with the requested model
//! and one with the fallback model. An attempt fails when the backend
//! errors or when the result's alpha channel is missing, uniform or almost
//! entirely transparent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_service::{BackgroundRemovalPipeline, PipelineConfig, RemovalParams};
//!
//! # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let pipeline = BackgroundRemovalPipeline::onnx(PipelineConfig::default())?;
//!
//! let result = pipeline.process(&upload, &RemovalParams::default()).await;
//! if let Some(image) = &result.image {
//!     std::fs::write("output.png", image.to_png_bytes()?)?;
//! } else {
//!     eprintln!("failed: {}", result.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom backends
//!
//! Inference sits behind two traits, [`SessionLoader`] and [`ModelBackend`].
//! Any implementation can be plugged in with
//! [`BackgroundRemovalPipeline::new`]; the ONNX Runtime implementation is
//! [`backends::OnnxBackend`].
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with CUDA / `CoreML` support
//! - `cli` (default): the `bgremove` binary
//! - `webp-support` (default): WebP decoding and encoding
//! - `tracing-json`, `tracing-files`: extra log outputs for the binary

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod session_cache;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{ExecutionProvider, OutputFormat, PipelineConfig, PipelineConfigBuilder};
pub use download::{validate_model_url, DownloadedArtifact, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::{InferenceSession, ModelBackend, ModelSessionHandle, SessionLoader};
pub use models::{ModelCatalog, ModelInfo};
pub use pipeline::{
    BackgroundRemovalPipeline, ImagePreprocessor, ImageValidator, PostProcessor,
    QualityValidator, RemovalExecutor, RetryFallbackController,
};
pub use services::OutputFormatHandler;
pub use session_cache::{ModelSessionCache, SessionCacheStats};
pub use types::{
    ColorMode, ImageArtifact, MattingParams, ProcessedImage, ProcessingRequest, ProcessingResult,
    RemovalParams,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingOutput};

/// A catalog entry as reported by [`service_info`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: String,
    pub description: String,
    /// Model input size as `[width, height]`
    pub input_size: [u32; 2],
}

/// Static description of the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub default_model: String,
    pub fallback_model: String,
    pub models: Vec<ModelSummary>,
    pub input_formats: Vec<String>,
    pub max_upload_bytes: usize,
}

/// Name, version, models and limits of the service with default configuration
#[must_use]
pub fn service_info() -> ServiceInfo {
    let config = PipelineConfig::default();
    ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_model: config.default_model,
        fallback_model: config.fallback_model,
        models: ModelCatalog::builtin()
            .iter()
            .map(|info| ModelSummary {
                id: info.id.clone(),
                description: info.description.clone(),
                input_size: info.preprocessing.target_size,
            })
            .collect(),
        input_formats: pipeline::validator::SUPPORTED_FORMATS
            .iter()
            .flat_map(|format| format.extensions_str().first())
            .map(|ext| (*ext).to_string())
            .collect(),
        max_upload_bytes: config.max_upload_bytes,
    }
}

/// Read an upload from an async stream and run it through `pipeline`
///
/// Reading stops one byte past the configured upload limit, so an oversized
/// stream is rejected without buffering all of it.
///
/// # Errors
/// - Stream read failures
/// - Everything [`BackgroundRemovalPipeline::try_process`] returns
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    reader: R,
    pipeline: &BackgroundRemovalPipeline,
    params: &RemovalParams,
) -> Result<ProcessedImage> {
    let limit = pipeline.config().max_upload_bytes as u64 + 1;
    let mut buffer = Vec::new();
    reader
        .take(limit)
        .read_to_end(&mut buffer)
        .await
        .map_err(BgRemovalError::Io)?;

    pipeline.try_process(&buffer, params).await
}
