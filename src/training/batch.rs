//! Per-batch processing
//!
//! One entry point, [`BatchHandler::process`], covering both the gradient
//! path (train) and the measured inference path (valid/infer). The
//! emitted metric names are a subset of the keys the active phase
//! declares on its meters.

use std::collections::HashMap;

use candle_core::{DType, Tensor};

use crate::criterion::Criterion;
use crate::error::Result;
use crate::metrics::compute_metrics;
use crate::model::ModelHandle;
use crate::training::inference::inference;
use crate::training::optimizers::{clip_grad_scale, OptimizerSet};
use crate::training::runner::LoaderPhase;

/// Flat metric emission for one batch, weighted by its sample count
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    /// Metric name → scalar value
    pub values: HashMap<String, f64>,

    /// Number of samples in the batch
    pub batch_size: usize,
}

/// Computes losses and performs gradient steps or measured inference for
/// a single batch
pub struct BatchHandler {
    grad_clip_max_norm: Option<f64>,
}

impl BatchHandler {
    /// Create a handler; `grad_clip_max_norm = None` disables clipping
    pub fn new(grad_clip_max_norm: Option<f64>) -> Self {
        Self { grad_clip_max_norm }
    }

    /// Process one batch under the given loader phase
    pub fn process(
        &self,
        batch: &Tensor,
        phase: LoaderPhase,
        model: &ModelHandle,
        criterion: &dyn Criterion,
        optimizers: &mut OptimizerSet,
    ) -> Result<BatchMetrics> {
        match phase {
            LoaderPhase::Train => self.train_batch(batch, model, criterion, optimizers),
            LoaderPhase::Valid | LoaderPhase::Infer => self.infer_batch(batch, model, criterion),
        }
    }

    fn train_batch(
        &self,
        batch: &Tensor,
        model: &ModelHandle,
        criterion: &dyn Criterion,
        optimizers: &mut OptimizerSet,
    ) -> Result<BatchMetrics> {
        let module = model.module();

        let out_net = module.read().forward(batch)?;
        let out_criterion = criterion.compute(&out_net, batch)?;
        // Contract check happens before any backward pass: a criterion
        // without a "loss" component must not trigger a gradient step.
        let loss = out_criterion.loss()?.clone();

        let grads = loss.backward()?;
        let scale = match self.grad_clip_max_norm {
            Some(max_norm) => {
                let vars = module.read().variables();
                clip_grad_scale(&vars, &grads, max_norm)?
            }
            None => 1.0,
        };
        optimizers.primary.step_scaled(&grads, scale)?;

        // The auxiliary backward pass runs after the primary step, with no
        // zero_grad in between: the auxiliary loss touches only the
        // entropy-model parameters, whose gradients are fresh.
        let aux_loss = module.read().aux_loss()?;
        let aux_grads = aux_loss.backward()?;
        optimizers.auxiliary.step(&aux_grads)?;
        optimizers.primary.zero_grad()?;
        optimizers.auxiliary.zero_grad()?;

        let mut values = HashMap::new();
        values.insert("loss".to_string(), scalar(&loss)?);
        values.insert("aux_loss".to_string(), scalar(&aux_loss)?);
        for (name, tensor) in out_criterion.components() {
            values.insert(name.clone(), scalar(tensor)?);
        }
        values.insert("lmbda".to_string(), criterion.lmbda());

        Ok(BatchMetrics {
            values,
            batch_size: batch.dims4()?.0,
        })
    }

    fn infer_batch(
        &self,
        batch: &Tensor,
        model: &ModelHandle,
        criterion: &dyn Criterion,
    ) -> Result<BatchMetrics> {
        let module = model.module().read();

        // Measured path: real entropy coder, bitrate from stream lengths.
        let out_infer = inference(module.as_ref(), batch)?;
        // Estimated path, kept for comparability with training losses.
        let out_net = module.forward(batch)?;
        let out_criterion = criterion.compute(&out_net, batch)?;
        let loss = out_criterion.loss()?.clone();
        let aux_loss = module.aux_loss()?;

        let quality = compute_metrics(batch, &out_infer.x_hat, &["psnr", "ms-ssim"])?;

        let mut values = HashMap::new();
        values.insert("loss".to_string(), scalar(&loss)?);
        values.insert("aux_loss".to_string(), scalar(&aux_loss)?);
        for (name, tensor) in out_criterion.components() {
            values.insert(name.clone(), scalar(tensor)?);
        }
        values.insert("lmbda".to_string(), criterion.lmbda());
        values.extend(quality);
        values.insert("bpp".to_string(), out_infer.bpp);
        // Extra keys; the meters only track what the phase declared.
        values.insert("encoding_time".to_string(), out_infer.encoding_time);
        values.insert("decoding_time".to_string(), out_infer.decoding_time);

        Ok(BatchMetrics {
            values,
            batch_size: batch.dims4()?.0,
        })
    }
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}
