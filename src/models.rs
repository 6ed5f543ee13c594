//! Catalog of supported pretrained segmentation models
//!
//! Every model identifier a caller may request resolves to a `ModelInfo`
//! describing where the ONNX artifact lives and how input tensors must be
//! prepared for it. The catalog is static; artifacts are fetched on demand
//! by [`crate::download::ModelDownloader`].

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};

/// Base URL for the published model artifacts
const RELEASE_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// ImageNet normalisation shared by the U2-Net family
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Tensor preparation parameters for a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input resolution expected by the network
    pub target_size: [u32; 2],
    /// Per-channel mean subtracted after scaling to 0..1
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation divided after mean subtraction
    pub normalization_std: [f32; 3],
}

/// Model family, which determines network architecture conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// U2-Net and its light/human variants (320px input)
    U2Net,
    /// ISNet / DIS variants (1024px input)
    IsNet,
}

/// Static description of a pretrained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Identifier callers use to request the model
    pub id: String,
    /// Architecture family
    pub family: ModelFamily,
    /// Human readable description
    pub description: String,
    /// File name of the artifact inside the model cache
    pub file_name: String,
    /// Download location of the artifact
    pub url: String,
    /// Approximate artifact size in bytes
    pub size_bytes: u64,
    /// Input preparation parameters
    pub preprocessing: PreprocessingConfig,
}

impl ModelInfo {
    fn new(
        id: &str,
        family: ModelFamily,
        description: &str,
        size_bytes: u64,
        mean: [f32; 3],
        std: [f32; 3],
    ) -> Self {
        let size = match family {
            ModelFamily::U2Net => 320,
            ModelFamily::IsNet => 1024,
        };
        let file_name = format!("{}.onnx", id);
        Self {
            id: id.to_string(),
            family,
            description: description.to_string(),
            url: format!("{}/{}", RELEASE_BASE_URL, file_name),
            file_name,
            size_bytes,
            preprocessing: PreprocessingConfig {
                target_size: [size, size],
                normalization_mean: mean,
                normalization_std: std,
            },
        }
    }

    /// Input tensor shape in NCHW layout
    #[must_use]
    pub fn input_shape(&self) -> (usize, usize, usize, usize) {
        let [w, h] = self.preprocessing.target_size;
        (1, 3, h as usize, w as usize)
    }
}

/// Registry of all models the service can load
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl ModelCatalog {
    /// Build the catalog of built-in models
    #[must_use]
    pub fn builtin() -> Self {
        let models = vec![
            ModelInfo::new(
                "u2net",
                ModelFamily::U2Net,
                "General purpose U2-Net, fast and reliable",
                176_300_000,
                IMAGENET_MEAN,
                IMAGENET_STD,
            ),
            ModelInfo::new(
                "u2netp",
                ModelFamily::U2Net,
                "Lightweight U2-Net",
                4_600_000,
                IMAGENET_MEAN,
                IMAGENET_STD,
            ),
            ModelInfo::new(
                "u2net_human_seg",
                ModelFamily::U2Net,
                "U2-Net tuned for human portraits",
                176_300_000,
                IMAGENET_MEAN,
                IMAGENET_STD,
            ),
            ModelInfo::new(
                "silueta",
                ModelFamily::U2Net,
                "Compressed U2-Net with similar quality",
                44_200_000,
                IMAGENET_MEAN,
                IMAGENET_STD,
            ),
            ModelInfo::new(
                "isnet-general-use",
                ModelFamily::IsNet,
                "ISNet general use, more accurate edges",
                178_600_000,
                [0.5, 0.5, 0.5],
                [1.0, 1.0, 1.0],
            ),
            ModelInfo::new(
                "isnet-anime",
                ModelFamily::IsNet,
                "ISNet tuned for anime and cartoon images",
                176_100_000,
                IMAGENET_MEAN,
                [1.0, 1.0, 1.0],
            ),
        ];
        Self { models }
    }

    /// Look up a model by identifier
    ///
    /// # Errors
    /// - Unknown model identifier
    pub fn resolve(&self, model_id: &str) -> Result<&ModelInfo> {
        self.models
            .iter()
            .find(|info| info.id == model_id)
            .ok_or_else(|| {
                BgRemovalError::model(format!(
                    "Unknown model '{}'. Available models: {}",
                    model_id,
                    self.ids().join(", ")
                ))
            })
    }

    /// Whether the identifier names a known model
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|info| info.id == model_id)
    }

    /// All model identifiers in catalog order
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|info| info.id.as_str()).collect()
    }

    /// Iterate over all models
    pub fn iter(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.iter()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
