//! Rate-distortion criterion
//!
//! The runner consumes the [`Criterion`] trait; [`RateDistortionLoss`] is
//! the standard implementation weighting a bitrate estimate against MSE
//! distortion.

use std::collections::HashMap;

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::model::NetworkOutput;

/// Named loss components produced by a criterion.
///
/// The `"loss"` component is contractual; its absence is a fatal error
/// surfaced before any gradient step.
#[derive(Debug, Clone)]
pub struct CriterionOutput {
    components: HashMap<String, Tensor>,
}

impl CriterionOutput {
    /// Build an output from named components
    pub fn new(components: HashMap<String, Tensor>) -> Self {
        Self { components }
    }

    /// The total loss. Missing `"loss"` is a criterion contract violation.
    pub fn loss(&self) -> Result<&Tensor> {
        self.components
            .get("loss")
            .ok_or_else(|| Error::criterion("criterion output is missing the `loss` component"))
    }

    /// Iterate over all named components
    pub fn components(&self) -> impl Iterator<Item = (&String, &Tensor)> {
        self.components.iter()
    }

    /// Look up a single component by name
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.components.get(name)
    }
}

/// Criterion collaborator interface
pub trait Criterion: Send {
    /// Compute loss components for a reconstruction against its input
    fn compute(&self, output: &NetworkOutput, input: &Tensor) -> Result<CriterionOutput>;

    /// The rate-distortion trade-off weight this criterion applies
    fn lmbda(&self) -> f64;
}

/// Weighted rate-distortion loss: `loss = lmbda * 255^2 * mse + bpp`.
///
/// The bitrate term is the likelihood-based estimate, not the measured
/// bitrate; measured bpp comes from the true inference path.
pub struct RateDistortionLoss {
    lmbda: f64,
}

impl RateDistortionLoss {
    /// Create a criterion with the given trade-off weight
    pub fn new(lmbda: f64) -> Self {
        Self { lmbda }
    }
}

impl Criterion for RateDistortionLoss {
    fn compute(&self, output: &NetworkOutput, input: &Tensor) -> Result<CriterionOutput> {
        let (n, _, h, w) = input.dims4()?;
        let num_pixels = (n * h * w) as f64;

        // Estimated rate: sum over latents of -log2(likelihood) per pixel.
        let mut bits: Option<Tensor> = None;
        for likelihoods in output.likelihoods.values() {
            let nats = likelihoods.log()?.sum_all()?;
            bits = Some(match bits {
                Some(acc) => (acc + &nats)?,
                None => nats,
            });
        }
        let bits = bits.ok_or_else(|| {
            Error::criterion("network output carries no likelihoods to estimate a bitrate from")
        })?;
        let bpp_loss = (bits * (-1.0 / (num_pixels * std::f64::consts::LN_2)))?;

        let mse_loss = (output.x_hat.sub(input))?.sqr()?.mean_all()?;

        let loss = ((&mse_loss * (self.lmbda * 255.0 * 255.0))? + &bpp_loss)?;

        let mut components = HashMap::new();
        components.insert("loss".to_string(), loss);
        components.insert("bpp_loss".to_string(), bpp_loss);
        components.insert("mse_loss".to_string(), mse_loss);
        Ok(CriterionOutput::new(components))
    }

    fn lmbda(&self) -> f64 {
        self.lmbda
    }
}
