//! Image to tensor conversion for segmentation models
//!
//! Models take a square NCHW tensor. The image is stretched to the model's
//! input size, scaled by its brightest channel value and then normalised
//! per channel with the model's mean and standard deviation.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
    utils::NumericValidator,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use ndarray::{Array4, ArrayView2};

/// Lower bound for the brightness scale so black images do not divide by zero
const MIN_SCALE: f32 = 1e-6;

/// Converts images into model input tensors and raw outputs back into masks
pub struct TensorPreprocessor;

impl TensorPreprocessor {
    /// Build the NCHW input tensor for a model
    ///
    /// # Errors
    /// - Invalid normalization parameters
    /// - Zero target size
    pub fn image_to_tensor(
        image: &DynamicImage,
        preprocessing: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        NumericValidator::validate_normalization_params(
            &preprocessing.normalization_mean,
            &preprocessing.normalization_std,
        )?;

        let [width, height] = preprocessing.target_size;
        if width == 0 || height == 0 {
            return Err(BgRemovalError::model("Model input size must be non-zero"));
        }

        let resized: RgbImage =
            image::imageops::resize(&image.to_rgb8(), width, height, FilterType::Lanczos3);

        Ok(Self::rgb_to_tensor(&resized, preprocessing))
    }

    fn rgb_to_tensor(canvas: &RgbImage, preprocessing: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let max_value = canvas.as_raw().iter().copied().max().unwrap_or(0);
        let scale = f32::from(max_value).max(MIN_SCALE);

        let mean = preprocessing.normalization_mean;
        let std = preprocessing.normalization_std;

        Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
            let value = f32::from(canvas.get_pixel(x as u32, y as u32)[c]) / scale;
            (value - mean[c]) / std[c]
        })
    }

    /// Turn a raw single-channel prediction into an 8-bit mask at the given size
    ///
    /// Predictions are min-max normalised before scaling to 0-255; a constant
    /// prediction yields an all-zero mask.
    ///
    /// # Errors
    /// - Empty prediction
    pub fn prediction_to_mask(
        prediction: ArrayView2<'_, f32>,
        width: u32,
        height: u32,
    ) -> Result<GrayImage> {
        let (rows, cols) = prediction.dim();
        if rows == 0 || cols == 0 {
            return Err(BgRemovalError::model("Model produced an empty prediction"));
        }

        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;

        let raw = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = prediction
                .get((y as usize, x as usize))
                .copied()
                .unwrap_or(min);
            let normalized = if range > f32::EPSILON {
                (value - min) / range
            } else {
                0.0
            };
            image::Luma([(normalized * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        if raw.dimensions() == (width, height) {
            return Ok(raw);
        }
        Ok(image::imageops::resize(
            &raw,
            width,
            height,
            FilterType::Lanczos3,
        ))
    }
}
