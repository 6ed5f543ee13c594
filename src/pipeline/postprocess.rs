//! Alpha edge smoothing and restoration to the caller's resolution

use crate::{
    error::{BgRemovalError, Result},
    types::{ImageArtifact, RestorationInfo},
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, RgbaImage};
use imageproc::filter::gaussian_blur_f32;

/// Final stage: alpha-only blur, then resize back to the original geometry
#[derive(Debug, Clone, Copy)]
pub struct PostProcessor {
    edge_refinement: bool,
    blur_sigma: f32,
}

impl PostProcessor {
    /// # Errors
    /// - `blur_sigma` is not a positive finite number
    pub fn new(edge_refinement: bool, blur_sigma: f32) -> Result<Self> {
        if !blur_sigma.is_finite() || blur_sigma <= 0.0 {
            return Err(BgRemovalError::config_value_error(
                "edge blur sigma",
                blur_sigma,
                "> 0.0",
                Some(0.5),
            ));
        }
        Ok(Self {
            edge_refinement,
            blur_sigma,
        })
    }

    /// Smooth alpha edges and restore the original dimensions
    ///
    /// RGB channels are never blurred. The resize uses a triangle filter so
    /// interpolated alpha stays between its neighbours.
    ///
    /// # Errors
    /// - Result does not match the restored dimensions (should not happen)
    pub fn finish(&self, image: ImageArtifact, restoration: &RestorationInfo) -> Result<ImageArtifact> {
        let mut rgba = match image.into_image() {
            DynamicImage::ImageRgba8(buffer) => buffer,
            other => other.to_rgba8(),
        };

        if self.edge_refinement {
            smooth_alpha(&mut rgba, self.blur_sigma);
        }

        let (target_w, target_h) = restoration.original_dimensions();
        if rgba.dimensions() != (target_w, target_h) {
            tracing::debug!(
                from = %format!("{}x{}", rgba.width(), rgba.height()),
                to = %format!("{}x{}", target_w, target_h),
                "restoring original dimensions"
            );
            rgba = image::imageops::resize(&rgba, target_w, target_h, FilterType::Triangle);
        }

        if rgba.dimensions() != (target_w, target_h) {
            return Err(BgRemovalError::internal(format!(
                "restored image is {}x{}, expected {}x{}",
                rgba.width(),
                rgba.height(),
                target_w,
                target_h
            )));
        }

        Ok(ImageArtifact::new(DynamicImage::ImageRgba8(rgba)))
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self {
            edge_refinement: true,
            blur_sigma: 0.5,
        }
    }
}

/// Gaussian blur applied to the alpha plane only
fn smooth_alpha(rgba: &mut RgbaImage, sigma: f32) {
    let alpha = GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        Luma([rgba.get_pixel(x, y)[3]])
    });
    let blurred = gaussian_blur_f32(&alpha, sigma);
    for (pixel, smoothed) in rgba.pixels_mut().zip(blurred.pixels()) {
        pixel[3] = smoothed[0];
    }
}
