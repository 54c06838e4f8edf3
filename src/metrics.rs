//! Reconstruction quality metrics
//!
//! PSNR and MS-SSIM between an input batch and its decoded reconstruction,
//! computed on `[N, C, H, W]` tensors with values in `[0, 1]`.

use std::collections::HashMap;

use candle_core::{DType, Tensor};

use crate::error::{Error, Result};

const MS_SSIM_WEIGHTS: [f64; 5] = [0.0448, 0.2856, 0.3001, 0.2363, 0.1333];
const SSIM_WINDOW: usize = 11;
const SSIM_SIGMA: f64 = 1.5;
const SSIM_C1: f64 = 0.01 * 0.01;
const SSIM_C2: f64 = 0.03 * 0.03;

/// Peak signal-to-noise ratio in dB, assuming a unit data range
pub fn psnr(x: &Tensor, x_hat: &Tensor) -> Result<f64> {
    let mse = x.sub(x_hat)?.sqr()?.mean_all()?.to_scalar::<f32>()? as f64;
    if mse <= 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(-10.0 * mse.log10())
}

/// Multi-scale structural similarity over the standard five scales
pub fn ms_ssim(x: &Tensor, x_hat: &Tensor) -> Result<f64> {
    let (_, c, h, w) = x.dims4()?;
    let min_side = h.min(w);
    // Each scale halves the resolution; the window must still fit at the
    // coarsest scale.
    let required = SSIM_WINDOW << (MS_SSIM_WEIGHTS.len() - 1);
    if min_side < required {
        return Err(Error::config(format!(
            "ms-ssim requires inputs of at least {required}x{required}, got {h}x{w}"
        )));
    }

    let window = gaussian_window(c, x)?;
    let mut a = x.clone();
    let mut b = x_hat.clone();
    let mut score = 1.0f64;

    for (scale, weight) in MS_SSIM_WEIGHTS.iter().enumerate() {
        let (ssim, cs) = ssim_single_scale(&a, &b, &window)?;
        let value = if scale + 1 == MS_SSIM_WEIGHTS.len() {
            ssim
        } else {
            cs
        };
        score *= value.max(0.0).powf(*weight);

        if scale + 1 < MS_SSIM_WEIGHTS.len() {
            a = a.avg_pool2d(2)?;
            b = b.avg_pool2d(2)?;
        }
    }

    Ok(score)
}

/// Compute the requested quality metrics between an input and its
/// reconstruction. Unknown keys are rejected as configuration errors.
pub fn compute_metrics(x: &Tensor, x_hat: &Tensor, keys: &[&str]) -> Result<HashMap<String, f64>> {
    let mut out = HashMap::new();
    for key in keys {
        let value = match *key {
            "psnr" => psnr(x, x_hat)?,
            "ms-ssim" => ms_ssim(x, x_hat)?,
            other => {
                return Err(Error::config(format!("unknown quality metric `{other}`")));
            }
        };
        out.insert((*key).to_string(), value);
    }
    Ok(out)
}

/// Per-channel gaussian filter of shape `[C, 1, K, K]` for grouped conv
fn gaussian_window(channels: usize, like: &Tensor) -> Result<Tensor> {
    let half = (SSIM_WINDOW as f64 - 1.0) / 2.0;
    let mut taps = Vec::with_capacity(SSIM_WINDOW);
    for i in 0..SSIM_WINDOW {
        let d = i as f64 - half;
        taps.push((-d * d / (2.0 * SSIM_SIGMA * SSIM_SIGMA)).exp());
    }
    let norm: f64 = taps.iter().sum();

    let mut data = Vec::with_capacity(SSIM_WINDOW * SSIM_WINDOW);
    for row in &taps {
        for col in &taps {
            data.push(((row * col) / (norm * norm)) as f32);
        }
    }

    let window = Tensor::from_vec(data, (1, 1, SSIM_WINDOW, SSIM_WINDOW), like.device())?
        .to_dtype(DType::F32)?;
    Ok(window.repeat((channels, 1, 1, 1))?)
}

/// One SSIM scale; returns (mean ssim, mean contrast-structure)
fn ssim_single_scale(a: &Tensor, b: &Tensor, window: &Tensor) -> Result<(f64, f64)> {
    let groups = a.dims4()?.1;
    let blur = |t: &Tensor| -> Result<Tensor> { Ok(t.conv2d(window, 0, 1, 1, groups)?) };

    let mu_a = blur(a)?;
    let mu_b = blur(b)?;
    let mu_aa = mu_a.sqr()?;
    let mu_bb = mu_b.sqr()?;
    let mu_ab = mu_a.mul(&mu_b)?;

    let sigma_aa = blur(&a.sqr()?)?.sub(&mu_aa)?;
    let sigma_bb = blur(&b.sqr()?)?.sub(&mu_bb)?;
    let sigma_ab = blur(&a.mul(b)?)?.sub(&mu_ab)?;

    let cs_num = ((sigma_ab * 2.0)? + SSIM_C2)?;
    let cs_den = ((sigma_aa + sigma_bb)? + SSIM_C2)?;
    let cs_map = cs_num.div(&cs_den)?;

    let lum_num = ((mu_ab * 2.0)? + SSIM_C1)?;
    let lum_den = ((mu_aa + mu_bb)? + SSIM_C1)?;
    let ssim_map = lum_num.div(&lum_den)?.mul(&cs_map)?;

    let ssim = ssim_map.mean_all()?.to_scalar::<f32>()? as f64;
    let cs = cs_map.mean_all()?.to_scalar::<f32>()? as f64;
    Ok((ssim, cs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn ramp(shape: (usize, usize, usize, usize)) -> Tensor {
        let device = Device::Cpu;
        let count = shape.0 * shape.1 * shape.2 * shape.3;
        let data: Vec<f32> = (0..count).map(|i| (i % 251) as f32 / 255.0).collect();
        Tensor::from_vec(data, shape, &device).unwrap()
    }

    #[test]
    fn test_psnr_identical_is_infinite() {
        let x = ramp((1, 1, 8, 8));
        assert!(psnr(&x, &x).unwrap().is_infinite());
    }

    #[test]
    fn test_psnr_known_value() {
        let device = Device::Cpu;
        let x = Tensor::zeros((1, 1, 4, 4), DType::F32, &device).unwrap();
        let y = Tensor::full(0.1f32, (1, 1, 4, 4), &device).unwrap();
        // mse = 0.01 -> psnr = 20 dB
        assert_relative_eq!(psnr(&x, &y).unwrap(), 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_ms_ssim_identical_is_one() {
        let x = ramp((1, 3, 192, 192));
        let score = ms_ssim(&x, &x).unwrap();
        assert_relative_eq!(score, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_ms_ssim_degrades_with_noise() {
        let x = ramp((1, 1, 192, 192));
        let device = Device::Cpu;
        let noise: Vec<f32> = (0..192 * 192)
            .map(|i| if i % 2 == 0 { 0.15 } else { -0.15 })
            .collect();
        let noise = Tensor::from_vec(noise, (1, 1, 192, 192), &device).unwrap();
        let noisy = x.add(&noise).unwrap().clamp(0.0f32, 1.0f32).unwrap();

        let clean = ms_ssim(&x, &x).unwrap();
        let degraded = ms_ssim(&x, &noisy).unwrap();
        assert!(degraded < clean);
    }

    #[test]
    fn test_ms_ssim_rejects_tiny_inputs() {
        let x = ramp((1, 1, 32, 32));
        assert!(ms_ssim(&x, &x).is_err());
    }

    #[test]
    fn test_compute_metrics_unknown_key() {
        let x = ramp((1, 1, 8, 8));
        assert!(compute_metrics(&x, &x, &["accuracy"]).is_err());
    }
}
