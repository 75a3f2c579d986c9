//! Reference implementations of the sublayers under test
//!
//! The trusted forward pass runs on candle from pretrained Qwen3 weights:
//! - Final RMS normalization
//! - MLP gate projection
//! - Full gated MLP (gate, up, SiLU, down)

mod qwen3;

pub use qwen3::{MlpReference, ProjectionReference, Qwen3Checkpoint, RmsNormReference};

use crate::error::Result;
use crate::fixture::FlatTensor;

/// Feature counts a sublayer declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SublayerDims {
    /// Input feature count (K / K_in)
    pub input: usize,
    /// Intermediate feature count (M for a projection, K_up for an MLP)
    pub hidden: usize,
    /// Output feature count (M / K_out)
    pub output: usize,
}

/// Trusted forward computation for one sublayer
pub trait ReferenceModel {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Declared feature dimensions
    fn dims(&self) -> SublayerDims;

    /// Forward pass over a row-major input whose last dimension is `dims().input`
    fn forward(&self, input: &FlatTensor) -> Result<FlatTensor>;
}
