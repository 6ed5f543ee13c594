//! Acceptance gate applied to every removal result
//!
//! Only the structure of the alpha channel is checked. A result passes when
//! it has alpha, the alpha is not uniform, and the subject was not mostly
//! erased.

use crate::types::ImageArtifact;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Reason a result failed the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityIssue {
    /// The result has no alpha channel
    MissingAlpha,
    /// Every pixel has the same alpha; nothing was removed
    UniformAlpha { value: u8 },
    /// Too much of the image became fully transparent
    OverRemoval { transparent_ratio: f32, limit: f32 },
}

impl std::fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAlpha => write!(f, "result has no alpha channel"),
            Self::UniformAlpha { value: 255 } => {
                write!(f, "alpha channel is uniformly opaque, no background was removed")
            },
            Self::UniformAlpha { value } => {
                write!(f, "alpha channel is uniform (every pixel {})", value)
            },
            Self::OverRemoval {
                transparent_ratio,
                limit,
            } => write!(
                f,
                "{:.1}% of pixels are fully transparent (limit {:.1}%), subject was over-removed",
                transparent_ratio * 100.0,
                limit * 100.0
            ),
        }
    }
}

/// Gate verdict
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accept,
    Reject(QualityIssue),
}

impl QualityVerdict {
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Alpha channel quality gate
#[derive(Debug, Clone, Copy)]
pub struct QualityValidator {
    /// Alpha below this counts as fully transparent
    transparent_cutoff: u8,
    /// Largest accepted fully-transparent fraction
    max_transparent_ratio: f32,
}

impl QualityValidator {
    #[must_use]
    pub fn new(transparent_cutoff: u8, max_transparent_ratio: f32) -> Self {
        Self {
            transparent_cutoff,
            max_transparent_ratio,
        }
    }

    /// Inspect a result and decide whether to accept it
    #[must_use]
    pub fn check(&self, result: &ImageArtifact) -> QualityVerdict {
        if !result.color_mode().has_alpha() {
            return QualityVerdict::Reject(QualityIssue::MissingAlpha);
        }

        // executor output is already RGBA8; only other layouts are converted
        let rgba: Cow<'_, RgbaImage> = match result.image().as_rgba8() {
            Some(buffer) => Cow::Borrowed(buffer),
            None => Cow::Owned(result.image().to_rgba8()),
        };
        let total = rgba.pixels().len();
        if total == 0 {
            return QualityVerdict::Reject(QualityIssue::MissingAlpha);
        }

        let mut alphas = rgba.pixels().map(|p| p[3]);
        let first = alphas.next().unwrap_or(0);
        let mut uniform = true;
        let mut transparent = usize::from(first < self.transparent_cutoff);
        for alpha in alphas {
            uniform &= alpha == first;
            if alpha < self.transparent_cutoff {
                transparent += 1;
            }
        }

        if uniform {
            return QualityVerdict::Reject(QualityIssue::UniformAlpha { value: first });
        }

        let ratio = transparent as f32 / total as f32;
        if ratio > self.max_transparent_ratio {
            return QualityVerdict::Reject(QualityIssue::OverRemoval {
                transparent_ratio: ratio,
                limit: self.max_transparent_ratio,
            });
        }

        QualityVerdict::Accept
    }
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(10, 0.95)
    }
}
