//! Training infrastructure
//!
//! The lifecycle runner and the pieces it owns: the per-batch handler,
//! the loader-scoped meters, the dual-objective optimizer set, and the
//! measured inference path.

pub mod batch;
pub mod inference;
pub mod meters;
pub mod optimizers;
pub mod runner;

pub use batch::{BatchHandler, BatchMetrics};
pub use inference::{inference, InferenceOutput};
pub use meters::{AdditiveMeter, MeterSet};
pub use optimizers::{clip_grad_scale, AdamWOptimizer, Optimizer, OptimizerSet};
pub use runner::{
    EpochRecord, ImageCompressionRunner, LoaderMetrics, LoaderPhase, RunContext, RunnerEvent,
};
