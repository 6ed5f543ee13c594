//! Configuration types for the background removal pipeline

use crate::error::{BgRemovalError, Result};
use crate::types::DEFAULT_MODEL;
use crate::utils::NumericValidator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default upload limit (50 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Default longest-side bound for inference input
pub const DEFAULT_MAX_DIMENSION: u32 = 4000;

/// Model used by the final attempt of the ladder
pub const DEFAULT_FALLBACK_MODEL: &str = "u2net";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency, composited on white)
    Jpeg,
    /// WebP with alpha channel transparency
    WebP,
}

/// Service-wide pipeline configuration
///
/// Request-scoped choices (model, matting) live in [`crate::RemovalParams`];
/// everything here is fixed for the lifetime of a pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,

    /// Longest side allowed into inference; larger inputs are downsized
    pub max_dimension: u32,

    /// Model used when a request does not name one
    pub default_model: String,

    /// Model used by the final attempt
    pub fallback_model: String,

    /// Alpha values below this count as fully transparent
    pub transparent_alpha_cutoff: u8,

    /// Results with a larger fully-transparent fraction are rejected
    pub max_transparent_ratio: f32,

    /// Soften the alpha edge before restoring the original size
    pub edge_refinement: bool,

    /// Gaussian sigma used for edge refinement
    pub edge_blur_sigma: f32,

    /// Maximum number of cached model sessions (0 = unbounded)
    pub session_cache_capacity: usize,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Model artifact directory override
    pub cache_dir: Option<PathBuf>,

    /// Download missing model artifacts on first use
    pub auto_download: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            default_model: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            transparent_alpha_cutoff: 10,
            max_transparent_ratio: 0.95,
            edge_refinement: true,
            edge_blur_sigma: 0.5,
            session_cache_capacity: 4,
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            cache_dir: None,
            auto_download: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use bgremove_service::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .fallback_model("u2netp")
    ///     .max_dimension(2048)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_dimension, 2048);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero upload limit or dimension bound
    /// - Empty model identifiers
    /// - Transparent ratio outside 0.0-1.0
    /// - Non-positive or non-finite blur sigma
    /// - Thread counts above the supported maximum
    pub fn validate(&self) -> Result<()> {
        NumericValidator::validate_positive(self.max_upload_bytes, "max upload bytes")?;
        NumericValidator::validate_positive(self.max_dimension, "max dimension")?;

        if self.default_model.trim().is_empty() {
            return Err(BgRemovalError::invalid_config("default model must not be empty"));
        }
        if self.fallback_model.trim().is_empty() {
            return Err(BgRemovalError::invalid_config("fallback model must not be empty"));
        }

        NumericValidator::validate_ratio(self.max_transparent_ratio, "max transparent ratio")?;

        if !self.edge_blur_sigma.is_finite() || self.edge_blur_sigma <= 0.0 {
            return Err(BgRemovalError::config_value_error(
                "edge blur sigma",
                self.edge_blur_sigma,
                "> 0.0",
                Some(0.5),
            ));
        }

        NumericValidator::validate_thread_count(self.intra_threads)?;
        NumericValidator::validate_thread_count(self.inter_threads)?;
        Ok(())
    }

    /// Load configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON
    /// - Values fail [`PipelineConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            BgRemovalError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BGREMOVE_*` environment overrides
    ///
    /// Recognised variables: `BGREMOVE_MAX_UPLOAD_BYTES`, `BGREMOVE_MAX_DIMENSION`,
    /// `BGREMOVE_DEFAULT_MODEL`, `BGREMOVE_FALLBACK_MODEL`,
    /// `BGREMOVE_SESSION_CACHE_CAPACITY`, `BGREMOVE_EXECUTION_PROVIDER`,
    /// `BGREMOVE_AUTO_DOWNLOAD`.
    ///
    /// # Errors
    /// - A variable is set but cannot be parsed
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(value) = env_value("BGREMOVE_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = parse_env("BGREMOVE_MAX_UPLOAD_BYTES", &value)?;
        }
        if let Some(value) = env_value("BGREMOVE_MAX_DIMENSION") {
            self.max_dimension = parse_env("BGREMOVE_MAX_DIMENSION", &value)?;
        }
        if let Some(value) = env_value("BGREMOVE_DEFAULT_MODEL") {
            self.default_model = value;
        }
        if let Some(value) = env_value("BGREMOVE_FALLBACK_MODEL") {
            self.fallback_model = value;
        }
        if let Some(value) = env_value("BGREMOVE_SESSION_CACHE_CAPACITY") {
            self.session_cache_capacity = parse_env("BGREMOVE_SESSION_CACHE_CAPACITY", &value)?;
        }
        if let Some(value) = env_value("BGREMOVE_EXECUTION_PROVIDER") {
            self.execution_provider = value.parse()?;
        }
        if let Some(value) = env_value("BGREMOVE_AUTO_DOWNLOAD") {
            self.auto_download = parse_env("BGREMOVE_AUTO_DOWNLOAD", &value)?;
        }
        Ok(self)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        BgRemovalError::invalid_config(format!("Invalid value '{}' for {}: {}", value, name, e))
    })
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set upload size limit in bytes
    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Set longest-side bound for inference input
    #[must_use]
    pub fn max_dimension(mut self, dimension: u32) -> Self {
        self.config.max_dimension = dimension;
        self
    }

    /// Set the model used when a request names none
    #[must_use]
    pub fn default_model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.default_model = model.into();
        self
    }

    /// Set the fallback model
    #[must_use]
    pub fn fallback_model<S: Into<String>>(mut self, model: S) -> Self {
        self.config.fallback_model = model.into();
        self
    }

    /// Set the alpha cutoff below which pixels count as transparent
    #[must_use]
    pub fn transparent_alpha_cutoff(mut self, cutoff: u8) -> Self {
        self.config.transparent_alpha_cutoff = cutoff;
        self
    }

    /// Set the maximum accepted fully-transparent fraction
    #[must_use]
    pub fn max_transparent_ratio(mut self, ratio: f32) -> Self {
        self.config.max_transparent_ratio = ratio;
        self
    }

    /// Enable or disable alpha edge refinement
    #[must_use]
    pub fn edge_refinement(mut self, enabled: bool) -> Self {
        self.config.edge_refinement = enabled;
        self
    }

    /// Set the edge refinement blur sigma
    #[must_use]
    pub fn edge_blur_sigma(mut self, sigma: f32) -> Self {
        self.config.edge_blur_sigma = sigma;
        self
    }

    /// Set the session cache capacity (0 = unbounded)
    #[must_use]
    pub fn session_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.session_cache_capacity = capacity;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set both intra and inter threads (inter = threads/2, minimum 1; 0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self.config.inter_threads = if threads > 0 { (threads / 2).max(1) } else { 0 };
        self
    }

    /// Set the model artifact directory
    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    /// Enable or disable automatic model downloads
    #[must_use]
    pub fn auto_download(mut self, enabled: bool) -> Self {
        self.config.auto_download = enabled;
        self
    }

    /// Build the configuration with validation
    ///
    /// # Errors
    /// - Any value rejected by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
