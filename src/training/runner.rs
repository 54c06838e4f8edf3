//! Lifecycle controller for training and evaluation
//!
//! The runner is a state machine over
//! `experiment → epoch → loader → batch` phases. It owns the meters and
//! the batch handler, and is driven synchronously by an external
//! orchestration loop invoking one hook per transition; it never assumes
//! control of scheduling itself.

use std::collections::BTreeMap;

use candle_core::Tensor;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::TrainerConfig;
use crate::criterion::Criterion;
use crate::error::{Error, Result};
use crate::logging::LoggerHub;
use crate::model::ModelHandle;
use crate::provenance::SourceProvenance;
use crate::report::{build_comparison, plot_rd, ComparisonTable, LayoutOverrides, RdPoint};
use crate::report::{BenchmarkStore, RdSeries};
use crate::training::batch::{BatchHandler, BatchMetrics};
use crate::training::meters::MeterSet;
use crate::training::optimizers::OptimizerSet;

/// Which dataset pass is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderPhase {
    /// Gradient-driven training pass
    Train,
    /// Validation pass with measured inference
    Valid,
    /// Full inference pass with measured inference
    Infer,
}

const TRAIN_KEYS: &[&str] = &["loss", "aux_loss", "bpp_loss", "mse_loss", "lmbda"];
const EVAL_KEYS: &[&str] = &[
    "loss", "aux_loss", "bpp_loss", "mse_loss", "lmbda", "psnr", "ms-ssim", "bpp",
];

impl LoaderPhase {
    /// Metric keys declared for this phase
    pub fn metric_keys(&self) -> &'static [&'static str] {
        match self {
            LoaderPhase::Train => TRAIN_KEYS,
            LoaderPhase::Valid | LoaderPhase::Infer => EVAL_KEYS,
        }
    }

    /// Whether gradient steps run in this phase
    pub fn is_train(&self) -> bool {
        matches!(self, LoaderPhase::Train)
    }

    /// Whether the entropy tables are refreshed at loader start
    pub fn is_infer(&self) -> bool {
        matches!(self, LoaderPhase::Infer)
    }

    /// Whether this phase depends on the model's auxiliary loss
    pub fn requires_aux(&self) -> bool {
        matches!(self, LoaderPhase::Train | LoaderPhase::Infer)
    }

    /// Loader name used in metric prefixes and records
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderPhase::Train => "train",
            LoaderPhase::Valid => "valid",
            LoaderPhase::Infer => "infer",
        }
    }
}

/// Mutable run state owned by the runner for its lifetime
#[derive(Debug)]
pub struct RunContext {
    /// Current epoch, 1-based once the first epoch starts
    pub epoch: usize,

    /// Active loader phase, `None` between loaders
    pub phase: Option<LoaderPhase>,

    /// Read-only hyperparameter view
    pub hparams: TrainerConfig,
}

/// Finalized metrics of one loader pass
#[derive(Debug, Clone)]
pub struct LoaderMetrics {
    /// Phase the pass ran under
    pub phase: LoaderPhase,

    /// Weighted means for every key that received data
    pub values: BTreeMap<String, f64>,

    /// Declared keys that received no data ("no data" conditions)
    pub missing: Vec<String>,
}

/// Per-epoch metric record; the epoch index is stamped at epoch end
#[derive(Debug, Clone, Default)]
pub struct EpochRecord {
    /// Epoch index, stamped by `on_epoch_end`
    pub epoch: usize,

    /// Completion time, stamped by `on_epoch_end`
    pub completed_at: Option<DateTime<Utc>>,

    /// Loader-level metrics keyed by loader name
    pub loaders: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Monitoring events emitted through the optional channel
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// Experiment hooks began
    ExperimentStarted,
    /// An epoch began
    EpochStarted {
        /// Epoch index
        epoch: usize,
    },
    /// A loader pass began
    LoaderStarted {
        /// Phase of the pass
        phase: LoaderPhase,
    },
    /// One batch finished
    BatchCompleted {
        /// Batch loss if emitted
        loss: Option<f64>,
    },
    /// A loader pass ended
    LoaderEnded {
        /// Phase of the pass
        phase: LoaderPhase,
    },
    /// An epoch ended
    EpochEnded {
        /// Epoch index
        epoch: usize,
    },
    /// Experiment hooks finished
    ExperimentEnded,
}

/// Callback-driven controller for image-compression training runs
pub struct ImageCompressionRunner {
    ctx: RunContext,
    model: ModelHandle,
    criterion: Box<dyn Criterion>,
    optimizers: OptimizerSet,
    batch_handler: BatchHandler,
    loggers: LoggerHub,
    benchmark: Option<Box<dyn BenchmarkStore>>,
    meters: Option<MeterSet>,
    epoch_record: EpochRecord,
    history: Vec<EpochRecord>,
    events: Option<UnboundedSender<RunnerEvent>>,
}

impl ImageCompressionRunner {
    /// Wire a runner from its collaborators
    pub fn new(
        hparams: TrainerConfig,
        model: ModelHandle,
        criterion: Box<dyn Criterion>,
        optimizers: OptimizerSet,
        loggers: LoggerHub,
    ) -> Result<Self> {
        hparams.validate()?;
        let batch_handler = BatchHandler::new(hparams.grad_clip_max_norm());
        Ok(Self {
            ctx: RunContext {
                epoch: 0,
                phase: None,
                hparams,
            },
            model,
            criterion,
            optimizers,
            batch_handler,
            loggers,
            benchmark: None,
            meters: None,
            epoch_record: EpochRecord::default(),
            history: Vec::new(),
            events: None,
        })
    }

    /// Attach a reference benchmark store for RD comparisons
    pub fn with_benchmark_store(mut self, store: Box<dyn BenchmarkStore>) -> Self {
        self.benchmark = Some(store);
        self
    }

    /// Attach a monitoring event channel
    pub fn with_event_channel(mut self, tx: UnboundedSender<RunnerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Read access to the run context
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Completed epoch records, oldest first
    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    /// Record provenance and run-level stats.
    ///
    /// Called once before the first epoch. Provenance is best-effort;
    /// the only fatal condition is an incompatible model wiring.
    pub fn on_experiment_start(&mut self) -> Result<()> {
        info!(model = %self.ctx.hparams.model.name, "experiment starting");

        if !self.model.module().read().has_aux_loss() {
            return Err(Error::config(
                "model provides no auxiliary loss; an entropy-model-free \
                 model cannot be trained by this runner",
            ));
        }

        SourceProvenance::new(&self.ctx.hparams.paths.src)
            .with_package(env!("CARGO_PKG_NAME"))
            .log_to(&mut self.loggers)?;

        let num_params = self.model.num_parameters();
        self.loggers
            .log_scalar("stats/num_params", num_params as f64, 0)?;

        self.send_event(RunnerEvent::ExperimentStarted);
        Ok(())
    }

    /// Begin the next epoch
    pub fn on_epoch_start(&mut self) -> Result<()> {
        self.ctx.epoch += 1;
        self.epoch_record = EpochRecord::default();
        debug!(epoch = self.ctx.epoch, "epoch starting");
        self.send_event(RunnerEvent::EpochStarted {
            epoch: self.ctx.epoch,
        });
        Ok(())
    }

    /// Begin a loader pass under the given phase.
    ///
    /// Declares the phase's metric keys on a fresh meter set; for the
    /// infer phase, refreshes the model's entropy tables first so that
    /// measured bitrates are valid.
    pub fn on_loader_start(&mut self, phase: LoaderPhase) -> Result<()> {
        if phase.requires_aux() && !self.model.module().read().has_aux_loss() {
            return Err(Error::config(format!(
                "model provides no auxiliary loss, required by the {} phase",
                phase.as_str()
            )));
        }

        if phase.is_infer() {
            self.model.module().write().update()?;
            debug!("entropy tables refreshed for inference");
        }

        self.meters = Some(MeterSet::declare(phase.metric_keys().iter().copied()));
        self.ctx.phase = Some(phase);
        self.send_event(RunnerEvent::LoaderStarted { phase });
        Ok(())
    }

    /// Process one batch and fold its metrics into the running means
    pub fn handle_batch(&mut self, batch: &Tensor) -> Result<BatchMetrics> {
        let phase = self
            .ctx
            .phase
            .ok_or_else(|| Error::lifecycle("handle_batch called outside a loader pass"))?;

        let metrics = self.batch_handler.process(
            batch,
            phase,
            &self.model,
            self.criterion.as_ref(),
            &mut self.optimizers,
        )?;

        let meters = self
            .meters
            .as_mut()
            .ok_or_else(|| Error::lifecycle("no meters declared for the active loader"))?;
        let weight = metrics.batch_size as f64;
        for (key, value) in &metrics.values {
            meters.update(key, *value, weight);
        }

        self.send_event(RunnerEvent::BatchCompleted {
            loss: metrics.values.get("loss").copied(),
        });
        Ok(metrics)
    }

    /// Finalize the loader pass: every declared key becomes a
    /// sample-weighted mean, keys without data are reported as missing,
    /// and the meters are discarded.
    pub fn on_loader_end(&mut self) -> Result<LoaderMetrics> {
        let phase = self
            .ctx
            .phase
            .take()
            .ok_or_else(|| Error::lifecycle("on_loader_end called outside a loader pass"))?;
        let meters = self
            .meters
            .take()
            .ok_or_else(|| Error::lifecycle("on_loader_end called before on_loader_start"))?;

        let mut values = BTreeMap::new();
        let mut missing = Vec::new();
        for key in meters.keys() {
            match meters.finalize(key) {
                Ok(value) => {
                    values.insert(key.to_string(), value);
                }
                Err(Error::NoData { metric }) => {
                    warn!(metric = %metric, loader = phase.as_str(), "no data for metric");
                    missing.push(metric);
                }
                Err(e) => return Err(e),
            }
        }

        for (key, value) in &values {
            self.loggers
                .log_scalar(&format!("{}/{key}", phase.as_str()), *value, self.ctx.epoch)?;
        }

        self.epoch_record
            .loaders
            .insert(phase.as_str().to_string(), values.clone());

        self.send_event(RunnerEvent::LoaderEnded { phase });
        Ok(LoaderMetrics {
            phase,
            values,
            missing,
        })
    }

    /// Stamp the epoch index into the epoch record and archive it
    pub fn on_epoch_end(&mut self) -> Result<&EpochRecord> {
        self.epoch_record.epoch = self.ctx.epoch;
        self.epoch_record.completed_at = Some(Utc::now());
        self.history.push(self.epoch_record.clone());
        info!(epoch = self.ctx.epoch, "epoch completed");
        self.send_event(RunnerEvent::EpochEnded {
            epoch: self.ctx.epoch,
        });
        Ok(&self.epoch_record)
    }

    /// Close out the experiment
    pub fn on_experiment_end(&mut self) -> Result<()> {
        info!(epochs = self.history.len(), "experiment finished");
        self.send_event(RunnerEvent::ExperimentEnded);
        Ok(())
    }

    /// Assemble and log the RD comparison for the configured codecs.
    ///
    /// Uses the most recent infer-loader metrics as the current model's
    /// datapoint. Without a benchmark store the call is skipped with a
    /// warning, matching the optional-capability policy.
    pub fn log_rd_curves(
        &mut self,
        hover_fields: &[&str],
        overrides: &LayoutOverrides,
    ) -> Result<Option<ComparisonTable>> {
        let Some(store) = self.benchmark.as_ref() else {
            warn!("no benchmark store attached, skipping RD comparison");
            return Ok(None);
        };

        let benchmarks = &self.ctx.hparams.benchmarks;
        let mut series: Vec<RdSeries> = Vec::with_capacity(benchmarks.codecs.len());
        for codec in &benchmarks.codecs {
            series.push(store.series(codec, &benchmarks.dataset)?);
        }

        let current = self.current_rd_point()?;
        let table = build_comparison(&series, &current, hover_fields);
        let figure = plot_rd(&series, &current, overrides);
        self.loggers.log_figure(
            &format!("rd-curves-{}-psnr", benchmarks.dataset),
            &figure,
        )?;
        Ok(Some(table))
    }

    /// The current model's RD datapoint from the last infer pass
    fn current_rd_point(&self) -> Result<RdPoint> {
        let metrics = self
            .epoch_record
            .loaders
            .get(LoaderPhase::Infer.as_str())
            .or_else(|| {
                self.history
                    .iter()
                    .rev()
                    .find_map(|r| r.loaders.get(LoaderPhase::Infer.as_str()))
            })
            .ok_or_else(|| Error::lifecycle("no infer-loader metrics recorded yet"))?;

        let get = |key: &str| -> Result<f64> {
            metrics.get(key).copied().ok_or_else(|| Error::no_data(key))
        };

        Ok(RdPoint {
            name: self.ctx.hparams.model.name.clone(),
            epoch: self.ctx.epoch,
            loss: get("loss")?,
            bpp: get("bpp")?,
            psnr: get("psnr")?,
        })
    }

    fn send_event(&self, event: RunnerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_key_sets() {
        assert_eq!(
            LoaderPhase::Train.metric_keys().to_vec(),
            vec!["loss", "aux_loss", "bpp_loss", "mse_loss", "lmbda"]
        );
        for phase in [LoaderPhase::Valid, LoaderPhase::Infer] {
            let keys = phase.metric_keys();
            for key in LoaderPhase::Train.metric_keys() {
                assert!(keys.contains(key));
            }
            for key in ["psnr", "ms-ssim", "bpp"] {
                assert!(keys.contains(&key));
            }
            assert_eq!(keys.len(), 8);
        }
    }

    #[test]
    fn test_phase_flags() {
        assert!(LoaderPhase::Train.is_train());
        assert!(!LoaderPhase::Valid.is_train());
        assert!(LoaderPhase::Infer.is_infer());
        assert!(!LoaderPhase::Valid.is_infer());
        assert!(LoaderPhase::Train.requires_aux());
        assert!(LoaderPhase::Infer.requires_aux());
        assert!(!LoaderPhase::Valid.requires_aux());
    }
}
