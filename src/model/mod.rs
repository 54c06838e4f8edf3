//! Compression-model collaborator surface
//!
//! The runner never depends on a concrete architecture. It consumes the
//! [`CompressionModel`] trait and always reaches it through a
//! [`ModelHandle`], which hides optional data-parallel/distributed
//! wrapping behind a single unwrap accessor.

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{Tensor, Var};
use parking_lot::RwLock;

use crate::error::Result;

/// Output of a forward pass through a compression network
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// Reconstructed input
    pub x_hat: Tensor,

    /// Estimated symbol likelihoods, keyed by latent name (e.g. "y", "z")
    pub likelihoods: HashMap<String, Tensor>,
}

/// An entropy-coded image produced by [`CompressionModel::compress`]
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// One bitstream per latent, per image in the batch
    pub streams: Vec<Vec<u8>>,

    /// Spatial shape of the innermost latent, needed for decompression
    pub latent_shape: (usize, usize),
}

impl EncodedImage {
    /// Total size of all bitstreams in bits
    pub fn num_bits(&self) -> usize {
        self.streams.iter().map(|s| s.len() * 8).sum()
    }
}

/// Capability surface of a learned image-compression model.
///
/// `forward` is the differentiable path used during training; `compress`
/// and `decompress` run the true entropy coder and are only valid after
/// `update` has refreshed the coder's cumulative distribution tables.
pub trait CompressionModel: Send {
    /// Differentiable forward pass producing a reconstruction and likelihoods
    fn forward(&self, x: &Tensor) -> Result<NetworkOutput>;

    /// Refresh entropy-coder tables from the current entropy-model state.
    ///
    /// Must run before `compress`/`decompress`; stale tables make measured
    /// bitrates invalid.
    fn update(&mut self) -> Result<()>;

    /// Auxiliary loss fitting the entropy model's internal parameters
    fn aux_loss(&self) -> Result<Tensor>;

    /// Encode a batch to entropy-coded bitstreams
    fn compress(&self, x: &Tensor) -> Result<EncodedImage>;

    /// Decode bitstreams back to a reconstruction
    fn decompress(&self, encoded: &EncodedImage) -> Result<Tensor>;

    /// All trainable parameters (primary objective)
    fn variables(&self) -> Vec<Var>;

    /// Entropy-model parameters (auxiliary objective)
    fn aux_variables(&self) -> Vec<Var>;

    /// Whether this model carries an entropy model with an auxiliary loss.
    ///
    /// Models answering `false` are incompatible with the train and infer
    /// phases; the runner rejects them at loader start.
    fn has_aux_loss(&self) -> bool {
        true
    }
}

/// Shared, lockable reference to the underlying model
pub type SharedModel = Arc<RwLock<Box<dyn CompressionModel>>>;

/// Model reference as wired into the runner, with optional parallel wrapping.
///
/// The wrapper only carries replica topology; every capability call goes
/// through [`ModelHandle::module`], so the runner unwraps exactly once and
/// never branches on the wrapper kind.
pub enum ModelHandle {
    /// Single-process model
    Plain(SharedModel),

    /// Single-host data-parallel wrapper
    DataParallel {
        /// The wrapped module
        module: SharedModel,
        /// Number of device replicas
        replicas: usize,
    },

    /// Multi-host distributed wrapper
    Distributed {
        /// The wrapped module
        module: SharedModel,
        /// Rank of this process
        rank: usize,
        /// Total number of processes
        world_size: usize,
    },
}

impl ModelHandle {
    /// Wrap a plain model
    pub fn plain(model: Box<dyn CompressionModel>) -> Self {
        Self::Plain(Arc::new(RwLock::new(model)))
    }

    /// Unwrap to the underlying module regardless of wrapper kind
    pub fn module(&self) -> &SharedModel {
        match self {
            Self::Plain(module) => module,
            Self::DataParallel { module, .. } => module,
            Self::Distributed { module, .. } => module,
        }
    }

    /// Total number of trainable parameter elements
    pub fn num_parameters(&self) -> usize {
        self.module()
            .read()
            .variables()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_image_bit_count() {
        let encoded = EncodedImage {
            streams: vec![vec![0u8; 12], vec![0u8; 4]],
            latent_shape: (4, 6),
        };
        assert_eq!(encoded.num_bits(), 128);
    }
}
