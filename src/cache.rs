//! On-disk cache for downloaded model artifacts
//!
//! Artifacts live as `<model-id>.onnx` files in a `models/` directory under
//! the cache root. The root is `$BGREMOVE_HOME` when set, otherwise the
//! platform cache directory (`~/.cache/bgremove` on Linux).

use crate::error::{BgRemovalError, Result};
use crate::models::ModelInfo;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_HOME_ENV: &str = "BGREMOVE_HOME";

const ARTIFACT_EXTENSION: &str = "onnx";

/// A model artifact found in the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedModelInfo {
    /// Model identifier (file stem)
    pub model_id: String,
    /// Path to the artifact
    pub path: PathBuf,
    /// Artifact size in bytes
    pub size_bytes: u64,
}

/// Model artifact cache
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating its directory if needed
    ///
    /// # Errors
    /// - Cache directory cannot be determined
    /// - Cache directory cannot be created
    pub fn new() -> Result<Self> {
        Self::with_custom_cache_dir(&Self::default_root()?)
    }

    /// Open the cache under `root`, or the default cache when `root` is `None`
    ///
    /// # Errors
    /// - Same as [`ModelCache::new`]
    pub fn open(root: Option<&Path>) -> Result<Self> {
        match root {
            Some(root) => Self::with_custom_cache_dir(root),
            None => Self::new(),
        }
    }

    /// Open a cache rooted at `cache_dir` (artifacts go to `cache_dir/models`)
    ///
    /// # Errors
    /// - Failed to create the models directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        if !models_dir.exists() {
            fs::create_dir_all(&models_dir).map_err(|e| {
                BgRemovalError::file_io_error("create model cache directory", &models_dir, &e)
            })?;
        }
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    fn default_root() -> Result<PathBuf> {
        if let Ok(home) = std::env::var(CACHE_HOME_ENV) {
            if !home.trim().is_empty() {
                return Ok(PathBuf::from(home));
            }
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} environment variable.",
                    CACHE_HOME_ENV
                ))
            })?
            .join("bgremove"))
    }

    /// Path where the artifact for `info` is stored (may not exist)
    #[must_use]
    pub fn model_path(&self, info: &ModelInfo) -> PathBuf {
        self.cache_dir.join(&info.file_name)
    }

    /// Whether a non-empty artifact for `info` exists
    #[must_use]
    pub fn is_model_cached(&self, info: &ModelInfo) -> bool {
        fs::metadata(self.model_path(info)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// List cached artifacts sorted by model identifier
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        let mut models = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Some(model_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            if size_bytes == 0 {
                continue;
            }
            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                path: path.clone(),
                size_bytes,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove every cached artifact, returning the removed identifiers
    ///
    /// # Errors
    /// - Failed to read the cache directory or remove a file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for model in self.scan_cached_models()? {
            log::info!("Removing cached model: {}", model.model_id);
            fs::remove_file(&model.path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model", &model.path, &e)
            })?;
            removed.push(model.model_id);
        }
        Ok(removed)
    }

    /// Remove the artifact for `info`; returns whether anything was removed
    ///
    /// # Errors
    /// - Failed to remove the file
    pub fn clear_specific_model(&self, info: &ModelInfo) -> Result<bool> {
        let path = self.model_path(info);
        if !path.exists() {
            return Ok(false);
        }
        log::info!("Removing cached model: {}", info.id);
        fs::remove_file(&path)
            .map_err(|e| BgRemovalError::file_io_error("remove cached model", &path, &e))?;
        Ok(true)
    }

    /// Directory holding the artifacts
    #[must_use]
    pub fn get_current_cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS.get(unit_index).unwrap_or(&"B"))
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}
