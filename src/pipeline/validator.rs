//! Input validation before any processing
//!
//! Uploads are checked against the size ceiling and decoded from one of the
//! accepted containers. Any failure here is a validation error; nothing
//! downstream runs for a rejected upload.

use crate::{
    error::{BgRemovalError, Result},
    types::{ColorMode, ImageArtifact},
};
use image::{ImageFormat, ImageReader};
use std::io::Cursor;

/// Containers accepted for upload
pub const SUPPORTED_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::WebP];

/// A decoded upload
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub image: ImageArtifact,
    /// Container the bytes were decoded from
    pub format: ImageFormat,
    /// Color mode as decoded, before normalisation
    pub color_mode: ColorMode,
    /// Size of the raw upload in bytes
    pub byte_len: usize,
}

/// Checks upload size, container and decodability
#[derive(Debug, Clone, Copy)]
pub struct ImageValidator {
    max_bytes: usize,
}

impl ImageValidator {
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Upload ceiling in bytes
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Validate and decode an upload
    ///
    /// `declared_size` is the size announced by the transport (for example a
    /// content length); it is checked as well as the actual buffer length so
    /// oversized uploads are rejected before decoding.
    ///
    /// # Errors
    /// - Empty buffer
    /// - Declared or actual size above the ceiling
    /// - Container not PNG, JPEG or WebP
    /// - Corrupt or truncated image data
    pub fn validate(&self, raw: &[u8], declared_size: Option<usize>) -> Result<ValidatedImage> {
        if raw.is_empty() {
            return Err(BgRemovalError::validation("Uploaded file is empty"));
        }

        let size = declared_size.unwrap_or(0).max(raw.len());
        if size > self.max_bytes {
            return Err(BgRemovalError::validation(format!(
                "File size {} exceeds maximum allowed size of {}",
                crate::cache::format_size(size as u64),
                crate::cache::format_size(self.max_bytes as u64)
            )));
        }

        let format = image::guess_format(raw).map_err(|_| {
            BgRemovalError::validation(
                "Unrecognized image data. Supported formats: PNG, JPEG, WebP",
            )
        })?;
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(BgRemovalError::validation(format!(
                "Unsupported image format {:?}. Supported formats: PNG, JPEG, WebP",
                format
            )));
        }

        let image = ImageReader::with_format(Cursor::new(raw), format)
            .decode()
            .map_err(|e| BgRemovalError::validation(format!("Invalid image file: {}", e)))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(BgRemovalError::validation("Image has zero width or height"));
        }

        let color_mode = ColorMode::from_color_type(image.color());
        log::debug!(
            "Validated {:?} upload: {}x{} {} ({} bytes)",
            format,
            image.width(),
            image.height(),
            color_mode,
            raw.len()
        );

        Ok(ValidatedImage {
            image: ImageArtifact::new(image),
            format,
            color_mode,
            byte_len: raw.len(),
        })
    }
}

impl Default for ImageValidator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_UPLOAD_BYTES)
    }
}
