//! Output format handling
//!
//! Converts an RGBA cutout into the bytes of the requested container. PNG and
//! WebP keep the alpha channel; JPEG has none, so the cutout is composited on
//! white first.

use crate::{
    config::OutputFormat,
    error::Result,
    types::ImageArtifact,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage};
use std::io::Cursor;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an RGBA image to the pixel layout of `format`
    ///
    /// ```rust
    /// use bgremove_service::{config::OutputFormat, services::OutputFormatHandler};
    /// use image::{DynamicImage, RgbaImage};
    ///
    /// let converted = OutputFormatHandler::convert_format(RgbaImage::new(4, 4), OutputFormat::Jpeg);
    /// assert!(matches!(converted, DynamicImage::ImageRgb8(_)));
    /// ```
    #[must_use]
    pub fn convert_format(rgba_image: RgbaImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(rgba_image),
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(flatten_on_white(&rgba_image)),
        }
    }

    /// Encode a result image into `format`
    ///
    /// `quality` only applies to JPEG; WebP output is lossless.
    ///
    /// # Errors
    /// - Encoder failures (including WebP without the `webp-support` feature)
    pub fn encode(image: &ImageArtifact, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        let converted = Self::convert_format(image.image().to_rgba8(), format);
        let mut buffer = Cursor::new(Vec::new());

        match format {
            OutputFormat::Png => converted.write_to(&mut buffer, ImageFormat::Png)?,
            OutputFormat::WebP => converted.write_to(&mut buffer, ImageFormat::WebP)?,
            OutputFormat::Jpeg => {
                let quality = quality.clamp(1, 100);
                let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
                encoder.encode_image(&converted)?;
            },
        }

        Ok(buffer.into_inner())
    }

    /// File extension for `format` (without the dot)
    ///
    /// ```rust
    /// use bgremove_service::{config::OutputFormat, services::OutputFormatHandler};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
        }
    }

    /// MIME type for `format`
    #[must_use]
    pub fn mime_type(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::WebP => "image/webp",
        }
    }

    /// Output format matching a file extension, case-insensitive
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<OutputFormat> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }

    /// Whether `format` can carry an alpha channel
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP => true,
            OutputFormat::Jpeg => false,
        }
    }

    /// Warn when the chosen format will lose the cutout's transparency
    pub fn validate_for_background_removal(format: OutputFormat) {
        if !Self::supports_transparency(format) {
            log::warn!(
                "Output format {:?} does not support transparency. Results will be composited on white.",
                format
            );
        }
    }

    /// `(default, min, max)` quality for lossy formats
    #[must_use]
    pub fn get_quality_range(format: OutputFormat) -> Option<(u8, u8, u8)> {
        match format {
            OutputFormat::Jpeg => Some((DEFAULT_JPEG_QUALITY, 1, 100)),
            OutputFormat::Png | OutputFormat::WebP => None,
        }
    }
}

/// Alpha-composite onto an opaque white background
fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let pixel = rgba.get_pixel(x, y);
        let alpha = u16::from(pixel[3]);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn artifact() -> ImageArtifact {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 0]));
        ImageArtifact::new(DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn test_jpeg_flattens_on_white() {
        let converted = OutputFormatHandler::convert_format(
            RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])),
            OutputFormat::Jpeg,
        );
        match converted {
            DynamicImage::ImageRgb8(rgb) => assert_eq!(rgb.get_pixel(0, 0).0, [255, 255, 255]),
            _ => panic!("Expected RGB8 image for JPEG format"),
        }

        let half = flatten_on_white(&RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        assert!((126..=128).contains(&half.get_pixel(0, 0)[0]));
    }

    #[test]
    fn test_png_round_trip_keeps_alpha() {
        let bytes = OutputFormatHandler::encode(&artifact(), OutputFormat::Png, 0).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(1, 1)[3], 255);
    }

    #[test]
    fn test_jpeg_encoding_produces_jpeg() {
        let bytes = OutputFormatHandler::encode(&artifact(), OutputFormat::Jpeg, 80).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_extension_helpers() {
        for format in [OutputFormat::Png, OutputFormat::Jpeg, OutputFormat::WebP] {
            let ext = OutputFormatHandler::get_extension(format);
            assert_eq!(OutputFormatHandler::from_extension(ext), Some(format));
        }
        assert_eq!(
            OutputFormatHandler::from_extension("JPEG"),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(OutputFormatHandler::from_extension("gif"), None);
        assert_eq!(OutputFormatHandler::mime_type(OutputFormat::WebP), "image/webp");
    }

    #[test]
    fn test_transparency_support() {
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::WebP));
        assert!(!OutputFormatHandler::supports_transparency(OutputFormat::Jpeg));
        assert_eq!(
            OutputFormatHandler::get_quality_range(OutputFormat::Jpeg),
            Some((90, 1, 100))
        );
        assert_eq!(OutputFormatHandler::get_quality_range(OutputFormat::Png), None);
    }
}
