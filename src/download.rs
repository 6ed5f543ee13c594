//! Model artifact downloading
//!
//! Artifacts are streamed into a hidden `.part` file next to their final
//! location, hashed while downloading, and renamed into place only after
//! the transfer completes, so a partial download is never mistaken for a
//! cached model.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use crate::models::ModelInfo;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Result of a completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    /// Final artifact path
    pub path: PathBuf,
    /// Bytes written
    pub size_bytes: u64,
    /// Hex SHA-256 of the artifact
    pub sha256: String,
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Set message for progress indicator
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => drop(msg),
        }
    }

    /// Set length for progress indicator
    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    /// Set position for progress indicator
    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    /// Finish progress indicator with message
    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => drop(msg),
        }
    }
}

/// Downloads catalog models into the artifact cache
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Return the cached artifact path for `info`, downloading it if missing
    ///
    /// # Errors
    /// - Download failures (see [`ModelDownloader::download_model`])
    pub async fn ensure_model(&self, info: &ModelInfo, show_progress: bool) -> Result<PathBuf> {
        if self.cache.is_model_cached(info) {
            log::debug!("Model '{}' already cached", info.id);
            return Ok(self.cache.model_path(info));
        }
        Ok(self.download_model(info, show_progress).await?.path)
    }

    /// Download the artifact for `info` into the cache, replacing any existing file
    ///
    /// # Errors
    /// - Invalid artifact URL
    /// - Network errors or non-success HTTP status
    /// - File system errors writing or renaming the artifact
    pub async fn download_model(
        &self,
        info: &ModelInfo,
        show_progress: bool,
    ) -> Result<DownloadedArtifact> {
        validate_model_url(&info.url)?;

        let final_path = self.cache.model_path(info);
        let part_path = partial_path(&final_path);

        let progress = if show_progress {
            Self::create_progress_indicator()
        } else {
            ProgressIndicator::NoOp
        };
        progress.set_message(format!("Downloading {}", info.id));
        log::info!("⬇️ Downloading model '{}' from {}", info.id, info.url);

        match self.download_file(&info.url, &part_path, &progress).await {
            Ok((size_bytes, sha256)) => {
                tokio::fs::rename(&part_path, &final_path).await.map_err(|e| {
                    BgRemovalError::file_io_error("move downloaded model", &final_path, &e)
                })?;
                progress.finish_with_message(format!("Downloaded {}", info.id));
                log::info!(
                    "✅ Model '{}' cached at {} ({} bytes, sha256 {})",
                    info.id,
                    final_path.display(),
                    size_bytes,
                    sha256
                );
                Ok(DownloadedArtifact {
                    path: final_path,
                    size_bytes,
                    sha256,
                })
            },
            Err(e) => {
                if part_path.exists() {
                    if let Err(cleanup_err) = tokio::fs::remove_file(&part_path).await {
                        log::warn!("Failed to cleanup partial download: {}", cleanup_err);
                    }
                }
                progress.finish_with_message(format!("Failed to download {}", info.id));
                Err(e)
            },
        }
    }

    /// Create a progress indicator for download reporting
    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-");
            pb.set_style(style);
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream `url` into `local_path`, returning size and SHA-256
    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: &ProgressIndicator,
    ) -> Result<(u64, String)> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("HTTP error {} for {}", response.status(), url),
                std::io::Error::new(std::io::ErrorKind::Other, "HTTP error"),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        if downloaded == 0 {
            return Err(BgRemovalError::network_error(
                format!("Empty response body for {}", url),
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no data"),
            ));
        }

        Ok((downloaded, format!("{:x}", hasher.finalize())))
    }
}

/// Hidden sibling path used while a download is in progress
fn partial_path(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.part", file_name))
}

/// Compute the hex SHA-256 of a file
///
/// # Errors
/// - File cannot be read
pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = std::fs::read(path)
        .map_err(|e| BgRemovalError::file_io_error("read file for verification", path, &e))?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validate that a URL can be used to fetch a model artifact
///
/// # Errors
/// - URL is not HTTPS
/// - URL does not point at an `.onnx` file
pub fn validate_model_url(url: &str) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(BgRemovalError::invalid_config(format!(
            "Model URL must use HTTPS: {}",
            url
        )));
    }
    if !url.ends_with(".onnx") {
        return Err(BgRemovalError::invalid_config(format!(
            "Model URL must point to an .onnx artifact: {}",
            url
        )));
    }
    Ok(())
}
