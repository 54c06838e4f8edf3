//! Hyperparameter configuration for training runs
//!
//! The runner receives a read-only view of this tree. Building the model,
//! criterion, optimizers and dataloaders from it is the responsibility of
//! the embedding application.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Model identification
    pub model: ModelSection,

    /// Rate-distortion criterion settings
    pub criterion: CriterionSection,

    /// Optimizer settings for the primary and auxiliary objectives
    pub optimizer: OptimizerSection,

    /// Run-level training parameters
    pub training: TrainingSection,

    /// Paths used for provenance artifacts
    pub paths: PathsSection,

    /// Reference-codec comparison settings
    #[serde(default)]
    pub benchmarks: BenchmarkSection,
}

/// Model identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Model name used in logs and RD comparisons
    pub name: String,
}

/// Rate-distortion criterion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionSection {
    /// Rate-distortion trade-off weight
    pub lmbda: f64,
}

/// Optimizer settings for the primary and auxiliary objectives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSection {
    /// Primary (rate-distortion) optimizer parameters
    pub net: OptimParams,

    /// Auxiliary (entropy-model) optimizer parameters
    pub aux: OptimParams,

    /// Gradient clipping; `None` disables clipping
    #[serde(default)]
    pub grad_clip: Option<GradClipConfig>,
}

/// Per-optimizer hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimParams {
    /// Learning rate
    pub lr: f64,

    /// Beta1 parameter (momentum)
    #[serde(default = "default_beta1")]
    pub beta1: f64,

    /// Beta2 parameter (RMSprop)
    #[serde(default = "default_beta2")]
    pub beta2: f64,

    /// Epsilon for numerical stability
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Decoupled weight decay coefficient
    #[serde(default)]
    pub weight_decay: f64,
}

/// Gradient clipping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradClipConfig {
    /// Maximum global gradient norm; `None` disables clipping
    #[serde(default)]
    pub max_norm: Option<f64>,
}

/// Run-level training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSection {
    /// Number of epochs the orchestration loop will drive
    pub epochs: usize,

    /// Global random seed
    #[serde(default = "default_seed")]
    pub seed: u64,
}

/// Paths used for provenance artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Directory holding source snapshots (git-diff patches, dependency lists)
    pub src: PathBuf,
}

/// Reference-codec comparison settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkSection {
    /// Reference codec names to plot against
    #[serde(default)]
    pub codecs: Vec<String>,

    /// Evaluation dataset name the reference curves were measured on
    #[serde(default)]
    pub dataset: String,
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-8
}

fn default_seed() -> u64 {
    42
}

impl TrainerConfig {
    /// Load a configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<()> {
        if self.model.name.is_empty() {
            return Err(Error::config("Model name must not be empty"));
        }

        if self.criterion.lmbda <= 0.0 {
            return Err(Error::config("Criterion lmbda must be positive"));
        }

        if self.optimizer.net.lr <= 0.0 || self.optimizer.aux.lr <= 0.0 {
            return Err(Error::config("Learning rates must be positive"));
        }

        if self.training.epochs == 0 {
            return Err(Error::config("Number of epochs must be greater than 0"));
        }

        if let Some(grad_clip) = &self.optimizer.grad_clip {
            if let Some(max_norm) = grad_clip.max_norm {
                if max_norm <= 0.0 {
                    return Err(Error::config("grad_clip.max_norm must be positive"));
                }
            }
        }

        Ok(())
    }

    /// Configured gradient-clip max norm, if clipping is enabled
    pub fn grad_clip_max_norm(&self) -> Option<f64> {
        self.optimizer.grad_clip.as_ref().and_then(|c| c.max_norm)
    }
}
