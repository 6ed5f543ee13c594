//! Color normalisation and downsizing ahead of inference

use crate::{
    error::Result,
    types::{ImageArtifact, RestorationInfo},
    utils::NumericValidator,
};
use image::{imageops::FilterType, DynamicImage};

/// Output of preprocessing: the image to segment plus restoration geometry
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: ImageArtifact,
    pub restoration: RestorationInfo,
}

/// Normalises color mode and bounds the longest side
#[derive(Debug, Clone, Copy)]
pub struct ImagePreprocessor {
    max_dimension: u32,
}

impl ImagePreprocessor {
    #[must_use]
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Normalise to RGB8 (RGBA8 when the input carries alpha) and downsize
    /// proportionally when either side exceeds the bound
    ///
    /// # Errors
    /// - Scaled dimensions cannot be represented
    pub fn prepare(&self, image: ImageArtifact) -> Result<PreparedImage> {
        let (width, height) = image.dimensions();
        let has_alpha = image.color_mode().has_alpha();

        let normalized = match image.into_image() {
            img @ (DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_)) => img,
            img if has_alpha => DynamicImage::ImageRgba8(img.to_rgba8()),
            img => DynamicImage::ImageRgb8(img.to_rgb8()),
        };

        let longest = width.max(height);
        if longest <= self.max_dimension {
            return Ok(PreparedImage {
                image: ImageArtifact::new(normalized),
                restoration: RestorationInfo::identity(width, height),
            });
        }

        let scale = self.max_dimension as f32 / longest as f32;
        let new_width = NumericValidator::validate_f32_to_u32(width as f32 * scale)?.max(1);
        let new_height = NumericValidator::validate_f32_to_u32(height as f32 * scale)?.max(1);

        tracing::debug!(
            from = %format!("{}x{}", width, height),
            to = %format!("{}x{}", new_width, new_height),
            scale,
            "downsizing oversized image"
        );

        let resized = normalized.resize_exact(new_width, new_height, FilterType::Lanczos3);
        Ok(PreparedImage {
            image: ImageArtifact::new(resized),
            restoration: RestorationInfo {
                original_width: width,
                original_height: height,
                scale,
            },
        })
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_DIMENSION)
    }
}
