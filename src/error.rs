//! Error types for the nic-trainer system

use thiserror::Error;

/// Main error type for training and evaluation operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (fatal, surfaced immediately)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Criterion contract violation (e.g. missing "loss" component)
    #[error("Criterion error: {0}")]
    Criterion(String),

    /// A collaborator lacks a capability the active phase requires
    #[error("Missing capability: {0}")]
    Capability(String),

    /// A metric was finalized before receiving any update
    #[error("No data for metric `{metric}`")]
    NoData {
        /// Name of the metric with no accumulated samples
        metric: String,
    },

    /// A lifecycle hook was invoked outside its legal state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Reference benchmark data could not be resolved
    #[error("Benchmark error: {0}")]
    Benchmark(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parsing error
    #[error("Config parsing error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for nic-trainer operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a criterion contract error
    pub fn criterion(msg: impl Into<String>) -> Self {
        Self::Criterion(msg.into())
    }

    /// Create a missing-capability error
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    /// Create a no-data error for a metric
    pub fn no_data(metric: impl Into<String>) -> Self {
        Self::NoData {
            metric: metric.into(),
        }
    }

    /// Create a lifecycle misuse error
    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// Create a benchmark lookup error
    pub fn benchmark(msg: impl Into<String>) -> Self {
        Self::Benchmark(msg.into())
    }
}
