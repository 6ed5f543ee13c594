//! Inference backend abstraction
//!
//! The pipeline treats segmentation as a black box behind two capabilities:
//! a [`SessionLoader`] that turns a model identifier into a loaded session,
//! and a [`ModelBackend`] that runs a loaded session on an image and returns
//! the RGBA cutout. Backends are injected, so tests can script both.

use crate::{error::Result, types::MattingParams};
use async_trait::async_trait;
use image::DynamicImage;
use std::any::Any;
use std::sync::Arc;

/// A loaded, reusable model session
///
/// Sessions are shared between concurrent requests through
/// [`ModelSessionHandle`], so implementations must be thread-safe.
pub trait InferenceSession: Send + Sync + std::fmt::Debug {
    /// Identifier of the model this session was loaded from
    fn model_id(&self) -> &str;

    /// Access the concrete session type
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a loaded session
pub type ModelSessionHandle = Arc<dyn InferenceSession>;

/// Loads model sessions by identifier
#[async_trait]
pub trait SessionLoader: Send + Sync {
    /// Load the session for `model_id`
    ///
    /// Loading may be slow (artifact download, graph optimisation) and is
    /// not bounded by a timeout here.
    ///
    /// # Errors
    /// - Unknown model identifier
    /// - Artifact missing or failed to download
    /// - Runtime failed to build the session
    async fn load_session(&self, model_id: &str) -> Result<ModelSessionHandle>;
}

/// Runs background removal with a loaded session
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Remove the background from `image`
    ///
    /// Returns an image with the input's dimensions. The pipeline rejects
    /// anything that is not four-channel RGBA.
    ///
    /// # Errors
    /// - Session belongs to a different backend
    /// - Runtime inference failure
    async fn remove(
        &self,
        session: &ModelSessionHandle,
        image: &DynamicImage,
        matting: &MattingParams,
    ) -> Result<DynamicImage>;
}
