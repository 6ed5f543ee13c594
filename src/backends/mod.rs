//! Backend implementations behind the inference seam
//!
//! - ONNX Runtime backend (U2-Net / ISNet models, GPU acceleration)
//! - Mask refinement and cutout helpers shared by backends

pub mod matting;

#[cfg(feature = "onnx")]
pub mod onnx;

// Test doubles for the session loader and removal capability
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxBackend, OnnxSession};
