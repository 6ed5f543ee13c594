//! Error conditions, edge cases and boundary values across the public API

mod common;

use bgremove_service::{
    pipeline::{QualityIssue, QualityVerdict},
    BackgroundRemovalPipeline, BgRemovalError, ImageArtifact, ImageValidator, MattingParams,
    PipelineConfig, QualityValidator, RemovalParams,
};
use common::{encode, subject_on_background, CountingLoader, SyntheticBackend};
use image::{DynamicImage, GrayAlphaImage, ImageFormat, LumaA, RgbImage, Rgba, RgbaImage};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

#[test]
fn validator_rejects_bad_uploads() {
    let validator = ImageValidator::new(1024);
    let png = encode(&subject_on_background(8, 8), ImageFormat::Png);

    let cases: Vec<(&[u8], Option<usize>, &str)> = vec![
        (&[], None, "empty"),
        (&png, Some(4096), "exceeds"),
        (b"GIF89a\x01\x00\x01\x00\x00\x00\x00;", None, "Unsupported"),
        (&png[..png.len() / 2], None, "Invalid image"),
        (b"hello world", None, "Unrecognized"),
    ];

    for (raw, declared, expected) in cases {
        let err = validator.validate(raw, declared).unwrap_err();
        assert!(err.is_client_error(), "{err}");
        assert_eq!(err.stage(), "validation");
        assert!(err.to_string().contains(expected), "{err} should mention {expected}");
    }
}

#[test]
fn validator_accepts_upload_at_the_ceiling() {
    let png = encode(&subject_on_background(8, 8), ImageFormat::Png);
    let validator = ImageValidator::new(png.len());
    let validated = validator.validate(&png, Some(png.len())).unwrap();
    assert_eq!(validated.format, ImageFormat::Png);
    assert_eq!(validated.byte_len, png.len());
}

#[test]
fn validator_normalises_unusual_color_types() {
    let grey_alpha = DynamicImage::ImageLumaA8(GrayAlphaImage::from_pixel(4, 4, LumaA([90, 200])));
    let raw = encode(&grey_alpha, ImageFormat::Png);
    let validated = ImageValidator::default().validate(&raw, None).unwrap();
    assert!(validated.color_mode.has_alpha());
}

#[test]
fn matting_parameter_boundaries() {
    let mut params = MattingParams {
        foreground_threshold: 1,
        background_threshold: 255,
        erode_size: 1,
        ..MattingParams::default()
    };
    assert!(params.validate().is_ok());

    params.erode_size = 20;
    assert!(params.validate().is_ok());

    for bad in [
        MattingParams {
            erode_size: 0,
            ..MattingParams::default()
        },
        MattingParams {
            erode_size: 21,
            ..MattingParams::default()
        },
        MattingParams {
            foreground_threshold: 0,
            ..MattingParams::default()
        },
        MattingParams {
            background_threshold: 0,
            ..MattingParams::default()
        },
    ] {
        let err = bad.validate().unwrap_err();
        assert!(err.is_client_error(), "{err}");
    }

    assert!(RemovalParams::for_model("  ").validate().is_err());
}

#[test]
fn quality_gate_boundaries() {
    let gate = QualityValidator::default();

    let rgb = ImageArtifact::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
    assert_eq!(gate.check(&rgb), QualityVerdict::Reject(QualityIssue::MissingAlpha));

    // 95 of 100 transparent is at the limit and still accepted
    let at_limit = RgbaImage::from_fn(10, 10, |x, y| {
        if y * 10 + x < 95 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    assert!(gate
        .check(&ImageArtifact::new(DynamicImage::ImageRgba8(at_limit)))
        .is_accept());

    let over_limit = RgbaImage::from_fn(10, 10, |x, y| {
        if y * 10 + x < 96 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([0, 0, 0, 255])
        }
    });
    assert!(matches!(
        gate.check(&ImageArtifact::new(DynamicImage::ImageRgba8(over_limit))),
        QualityVerdict::Reject(QualityIssue::OverRemoval { .. })
    ));

    let uniform_half = RgbaImage::from_pixel(5, 5, Rgba([1, 2, 3, 128]));
    assert!(matches!(
        gate.check(&ImageArtifact::new(DynamicImage::ImageRgba8(uniform_half))),
        QualityVerdict::Reject(QualityIssue::UniformAlpha { value: 128 })
    ));
}

#[test]
fn invalid_pipeline_configs_are_rejected() {
    let loader = Arc::new(CountingLoader::new());
    let backend = Arc::new(SyntheticBackend::new());

    let mut config = PipelineConfig::default();
    config.max_transparent_ratio = 1.5;
    let err = BackgroundRemovalPipeline::new(config, loader.clone(), backend.clone()).unwrap_err();
    assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

    let mut config = PipelineConfig::default();
    config.edge_blur_sigma = 0.0;
    assert!(BackgroundRemovalPipeline::new(config, loader.clone(), backend.clone()).is_err());

    let mut config = PipelineConfig::default();
    config.fallback_model = String::new();
    assert!(BackgroundRemovalPipeline::new(config, loader, backend).is_err());
}

#[test]
fn config_file_errors_name_the_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    let err = PipelineConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, BgRemovalError::InvalidConfig(_)));

    let err = PipelineConfig::from_json_file("/definitely/not/here.json").unwrap_err();
    assert!(matches!(err, BgRemovalError::Io(_)));
}

#[test]
fn config_file_partial_values_keep_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "fallback_model": "u2netp", "max_dimension": 1024 }}"#).unwrap();
    let config = PipelineConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.fallback_model, "u2netp");
    assert_eq!(config.max_dimension, 1024);
    assert_eq!(config.default_model, "isnet-general-use");
}

#[test]
fn error_classification() {
    let exhausted = BgRemovalError::Exhausted {
        attempts: 3,
        summary: "attempt 1 (a): inference failed: boom".to_string(),
    };
    assert!(!exhausted.is_client_error());
    assert!(!exhausted.is_retryable());
    assert_eq!(exhausted.stage(), "retry");

    let inference = BgRemovalError::inference("a", "boom");
    assert!(inference.is_retryable());
    assert_eq!(inference.stage(), "inference");

    assert_eq!(BgRemovalError::quality_rejected("a", "opaque").stage(), "quality");
}

#[tokio::test]
async fn one_pixel_image_fails_quality_but_never_panics() {
    let raw = encode(&subject_on_background(1, 1), ImageFormat::Png);
    let pipeline = BackgroundRemovalPipeline::new(
        PipelineConfig::default(),
        Arc::new(CountingLoader::new()),
        Arc::new(SyntheticBackend::new()),
    )
    .unwrap();

    let result = pipeline.process(&raw, &RemovalParams::default()).await;
    assert!(!result.success);
    assert_eq!(result.attempts.len(), 3);
}

#[tokio::test]
async fn unloadable_requested_model_falls_back() {
    let raw = encode(&subject_on_background(40, 40), ImageFormat::Png);
    let loader = Arc::new(CountingLoader::new().broken("missing-model"));
    let backend = SyntheticBackend::new();
    let pipeline = BackgroundRemovalPipeline::new(
        PipelineConfig::default(),
        loader.clone(),
        Arc::new(backend.clone()),
    )
    .unwrap();

    let result = pipeline
        .process(&raw, &RemovalParams::for_model("missing-model"))
        .await;

    assert!(result.success, "{}", result.message);
    assert!(result.fallback_used);
    assert_eq!(loader.load_count("missing-model"), 2);
    assert_eq!(backend.calls(), vec!["u2net"]);
    assert!(result.attempts[0].to_string().contains("session unavailable"));
}
