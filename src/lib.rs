//! nic-trainer - training-loop runner for learned image compression
//!
//! This crate drives learned image-compression models through a nested
//! experiment → epoch → loader → batch lifecycle, performs dual-objective
//! optimization (rate-distortion loss plus entropy-model auxiliary loss),
//! accumulates sample-weighted running metrics per loader pass, runs true
//! encode/decode inference for measured bitrates, and assembles
//! rate-distortion comparisons against reference codecs.
//!
//! Model architectures, dataset loading, and the orchestration loop that
//! invokes the lifecycle hooks are external collaborators; this crate
//! specifies their interfaces and nothing more.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod criterion;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod provenance;
pub mod report;
pub mod training;

// Re-exports
pub use config::TrainerConfig;
pub use criterion::{Criterion, CriterionOutput, RateDistortionLoss};
pub use error::{Error, Result};
pub use logging::{LogCapability, LoggerHub, LoggerSink};
pub use model::{CompressionModel, EncodedImage, ModelHandle, NetworkOutput};
pub use provenance::SourceProvenance;
pub use report::{
    build_comparison, plot_rd, BenchmarkStore, ComparisonTable, JsonBenchmarkStore,
    LayoutOverrides, RdFigure, RdPoint, RdSeries,
};
pub use training::{
    BatchHandler, BatchMetrics, ImageCompressionRunner, LoaderMetrics, LoaderPhase, MeterSet,
    Optimizer, OptimizerSet, RunnerEvent,
};
