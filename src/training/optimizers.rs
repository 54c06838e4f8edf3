//! Optimizers for the dual-objective training step
//!
//! The primary optimizer drives the rate-distortion loss over all model
//! parameters; the auxiliary optimizer fits the entropy-model parameters
//! against the auxiliary loss. Both expose the same trait surface and are
//! stepped independently within a single batch.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use crate::config::OptimParams;
use crate::error::Result;

/// Optimizer interface consumed by the batch handler
pub trait Optimizer: Send {
    /// Optimizer name for logs
    fn name(&self) -> &str;

    /// Apply one update from the given gradients
    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.step_scaled(gradients, 1.0)
    }

    /// Apply one update with all gradients scaled by `scale`.
    ///
    /// The scale carries the global-norm clip factor; `1.0` means no
    /// clipping.
    fn step_scaled(&mut self, gradients: &GradStore, scale: f64) -> Result<()>;

    /// Clear any gradient bookkeeping before the next batch
    fn zero_grad(&mut self) -> Result<()>;

    /// Current learning rate
    fn learning_rate(&self) -> f64;

    /// Set the learning rate (scheduler seam)
    fn set_learning_rate(&mut self, lr: f64);

    /// Number of completed steps
    fn step_count(&self) -> usize;
}

/// The two optimizers of a dual-objective run, keyed primary/auxiliary
pub struct OptimizerSet {
    /// Optimizer for the rate-distortion objective
    pub primary: Box<dyn Optimizer>,

    /// Optimizer for the entropy-model auxiliary objective
    pub auxiliary: Box<dyn Optimizer>,
}

impl OptimizerSet {
    /// Build a set from the two optimizers
    pub fn new(primary: Box<dyn Optimizer>, auxiliary: Box<dyn Optimizer>) -> Self {
        Self { primary, auxiliary }
    }
}

/// Global-norm gradient clip factor.
///
/// Returns the factor the gradients must be scaled by so their global L2
/// norm does not exceed `max_norm`; `1.0` when already within bounds or
/// when no tracked variable has a gradient.
pub fn clip_grad_scale(vars: &[Var], gradients: &GradStore, max_norm: f64) -> Result<f64> {
    let mut total_sq = 0.0f64;
    let mut seen = false;
    for var in vars {
        if let Some(grad) = gradients.get(var.as_tensor()) {
            total_sq += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
            seen = true;
        }
    }
    if !seen {
        return Ok(1.0);
    }
    let norm = total_sq.sqrt();
    if norm > max_norm {
        Ok(max_norm / (norm + 1e-6))
    } else {
        Ok(1.0)
    }
}

/// AdamW with decoupled weight decay over an explicit variable set
pub struct AdamWOptimizer {
    name: String,
    vars: Vec<Var>,
    params: OptimParams,
    step_count: usize,
    /// First and second moment estimates, parallel to `vars`
    moments: Vec<Option<(Tensor, Tensor)>>,
}

impl AdamWOptimizer {
    /// Create an AdamW optimizer over the given variables
    pub fn new(name: impl Into<String>, vars: Vec<Var>, params: OptimParams) -> Self {
        let moments = vars.iter().map(|_| None).collect();
        Self {
            name: name.into(),
            vars,
            params,
            step_count: 0,
            moments,
        }
    }
}

impl Optimizer for AdamWOptimizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn step_scaled(&mut self, gradients: &GradStore, scale: f64) -> Result<()> {
        self.step_count += 1;
        for i in 0..self.vars.len() {
            let var = self.vars[i].clone();
            let Some(grad) = gradients.get(var.as_tensor()) else {
                continue;
            };
            let grad = if scale != 1.0 {
                (grad * scale)?
            } else {
                grad.clone()
            };
            adamw_update(&var, &grad, &mut self.moments[i], &self.params, self.step_count)?;
        }
        Ok(())
    }

    fn zero_grad(&mut self) -> Result<()> {
        // Gradients live in per-backward stores, so there is nothing to
        // clear between batches; the hook keeps the two-optimizer step
        // sequence explicit.
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    fn step_count(&self) -> usize {
        self.step_count
    }
}

/// One AdamW update for a single parameter.
///
/// m_t = β₁ m_{t-1} + (1-β₁) g_t, v_t = β₂ v_{t-1} + (1-β₂) g_t², with
/// bias correction and decoupled weight decay.
fn adamw_update(
    var: &Var,
    grad: &Tensor,
    moments: &mut Option<(Tensor, Tensor)>,
    params: &OptimParams,
    step: usize,
) -> Result<()> {
    let (m_prev, v_prev) = match moments.take() {
        Some(pair) => pair,
        None => {
            let zeros = grad.zeros_like()?;
            (zeros.clone(), zeros)
        }
    };

    let m = ((m_prev * params.beta1)? + (grad * (1.0 - params.beta1))?)?;
    let v = ((v_prev * params.beta2)? + (grad.sqr()? * (1.0 - params.beta2))?)?;

    let bias1 = 1.0 - params.beta1.powi(step as i32);
    let bias2 = 1.0 - params.beta2.powi(step as i32);
    let m_hat = (&m / bias1)?;
    let v_hat = (&v / bias2)?;

    let denom = (v_hat.sqrt()? + params.epsilon)?;
    let mut update = (m_hat.div(&denom)? * params.lr)?;
    if params.weight_decay > 0.0 {
        let decay = (var.as_tensor() * (params.lr * params.weight_decay))?;
        update = (update + decay)?;
    }

    var.set(&var.as_tensor().sub(&update)?)?;
    *moments = Some((m, v));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn params(lr: f64) -> OptimParams {
        OptimParams {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
        }
    }

    #[test]
    fn test_adamw_step_moves_parameter_against_gradient() {
        let device = Device::Cpu;
        let var = Var::zeros((2, 2), DType::F32, &device).unwrap();
        let loss = var.as_tensor().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        let mut opt = AdamWOptimizer::new("net", vec![var.clone()], params(0.1));
        opt.step(&grads).unwrap();

        // Gradient of sum() is +1 everywhere, so values must decrease.
        let value = var.as_tensor().mean_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(value < 0.0);
        assert_eq!(opt.step_count(), 1);
    }

    #[test]
    fn test_clip_scale_below_threshold_is_identity() {
        let device = Device::Cpu;
        let var = Var::zeros(4, DType::F32, &device).unwrap();
        let loss = (var.as_tensor() * 0.1).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        // Gradient is 0.1 per element; global norm = 0.2 < 10.
        let scale = clip_grad_scale(&[var], &grads, 10.0).unwrap();
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn test_clip_scale_reduces_large_gradients() {
        let device = Device::Cpu;
        let var = Var::zeros(4, DType::F32, &device).unwrap();
        let loss = (var.as_tensor() * 100.0).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        // Gradient is 100 per element; global norm = 200.
        let scale = clip_grad_scale(&[var], &grads, 1.0).unwrap();
        assert!(scale < 0.01);
    }

    #[test]
    fn test_clip_scale_without_tracked_grads() {
        let device = Device::Cpu;
        let tracked = Var::zeros(4, DType::F32, &device).unwrap();
        let other = Var::ones(4, DType::F32, &device).unwrap();
        let loss = other.as_tensor().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        assert_eq!(clip_grad_scale(&[tracked], &grads, 1.0).unwrap(), 1.0);
    }
}
