//! Mask refinement and cutout composition
//!
//! Turns the soft mask predicted by a segmentation model into the RGBA
//! cutout returned by a backend. Optional steps, controlled by
//! [`MattingParams`]:
//!
//! - mask post-processing: morphological opening removes speckles, then a
//!   Gaussian blur and re-threshold give a clean binary mask
//! - alpha matting: a trimap is built from the foreground and background
//!   thresholds, both certain regions are eroded, and the band in between
//!   keeps smoothed soft alpha from the model
//!
//! Without matting the mask is used directly as the alpha channel.

use crate::types::MattingParams;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{erode, open};

/// Trimap value for pixels that are certainly foreground
pub const TRIMAP_FOREGROUND: u8 = 255;
/// Trimap value for pixels that are certainly background
pub const TRIMAP_BACKGROUND: u8 = 0;
/// Trimap value for the unknown band
pub const TRIMAP_UNKNOWN: u8 = 128;

const MASK_BLUR_SIGMA: f32 = 2.0;
const MASK_THRESHOLD: u8 = 127;
const BAND_BLUR_SIGMA: f32 = 1.0;

/// Clean up a raw mask: opening, smoothing, re-threshold to binary
#[must_use]
pub fn post_process_mask(mask: &GrayImage) -> GrayImage {
    let opened = open(mask, Norm::L1, 1);
    let mut smoothed = gaussian_blur_f32(&opened, MASK_BLUR_SIGMA);
    for pixel in smoothed.pixels_mut() {
        pixel[0] = if pixel[0] > MASK_THRESHOLD { 255 } else { 0 };
    }
    smoothed
}

/// Build a trimap from a soft mask
///
/// Pixels above `foreground_threshold` are foreground and pixels below
/// `background_threshold` are background; both regions are eroded by
/// `erode_size` so the unknown band covers the uncertain boundary.
#[must_use]
pub fn build_trimap(mask: &GrayImage, params: &MattingParams) -> GrayImage {
    let (width, height) = mask.dimensions();
    let region = |predicate: &dyn Fn(u8) -> bool| {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if predicate(mask.get_pixel(x, y)[0]) { 255 } else { 0 }])
        })
    };

    let foreground = region(&|v| v > params.foreground_threshold);
    let background = region(&|v| v < params.background_threshold);

    // Square structuring element of side erode_size
    let radius = params.erode_size / 2;
    let (foreground, background) = if radius > 0 {
        (
            erode(&foreground, Norm::LInf, radius),
            erode(&background, Norm::LInf, radius),
        )
    } else {
        (foreground, background)
    };

    GrayImage::from_fn(width, height, |x, y| {
        if foreground.get_pixel(x, y)[0] == 255 {
            Luma([TRIMAP_FOREGROUND])
        } else if background.get_pixel(x, y)[0] == 255 {
            Luma([TRIMAP_BACKGROUND])
        } else {
            Luma([TRIMAP_UNKNOWN])
        }
    })
}

/// Derive alpha from a trimap and the soft mask
///
/// Returns `None` when the trimap is degenerate (no certain foreground or
/// no unknown band), in which case the caller uses a naive cutout.
#[must_use]
pub fn estimate_alpha(mask: &GrayImage, trimap: &GrayImage) -> Option<GrayImage> {
    let has_foreground = trimap.pixels().any(|p| p[0] == TRIMAP_FOREGROUND);
    let has_unknown = trimap.pixels().any(|p| p[0] == TRIMAP_UNKNOWN);
    if !has_foreground || !has_unknown {
        return None;
    }

    let smoothed = gaussian_blur_f32(mask, BAND_BLUR_SIGMA);
    Some(GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        match trimap.get_pixel(x, y)[0] {
            TRIMAP_FOREGROUND => Luma([255]),
            TRIMAP_BACKGROUND => Luma([0]),
            _ => *smoothed.get_pixel(x, y),
        }
    }))
}

/// Apply a mask as alpha, keeping any existing transparency of the input
#[must_use]
pub fn naive_cutout(image: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgba([r, g, b, a]) = *image.get_pixel(x, y);
        let m = mask.get_pixel(x, y)[0];
        let alpha = (u16::from(a) * u16::from(m) + 127) / 255;
        Rgba([r, g, b, alpha as u8])
    })
}

/// Compose the final cutout from an image and its predicted mask
///
/// `mask` must have the image's dimensions.
#[must_use]
pub fn cutout(image: &RgbaImage, mask: &GrayImage, params: &MattingParams) -> RgbaImage {
    let mask = if params.post_process_mask {
        post_process_mask(mask)
    } else {
        mask.clone()
    };

    if params.enabled {
        let trimap = build_trimap(&mask, params);
        if let Some(alpha) = estimate_alpha(&mask, &trimap) {
            return naive_cutout(image, &alpha);
        }
        log::debug!("Trimap has no usable unknown band, using naive cutout");
    }

    naive_cutout(image, &mask)
}
