//! Capability-checked logger sinks
//!
//! Sinks advertise the capabilities they implement; the hub dispatches
//! each call only to sinks advertising the matching capability, so a
//! sink lacking one is skipped rather than failed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::report::RdFigure;

/// Capabilities a sink can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCapability {
    /// File artifacts (provenance diffs, dependency lists)
    Artifact,
    /// Rendered figures
    Figure,
    /// Value distributions
    Distribution,
    /// Scalar metrics
    Scalar,
}

/// One logging destination.
///
/// Methods default to no-ops; a sink only implements the calls matching
/// the capabilities it advertises.
pub trait LoggerSink: Send {
    /// Sink name for diagnostics
    fn name(&self) -> &str;

    /// Capabilities this sink implements
    fn capabilities(&self) -> &[LogCapability];

    /// Record a file artifact
    fn log_artifact(&mut self, _tag: &str, _path: &Path) -> Result<()> {
        Ok(())
    }

    /// Record a rendered figure
    fn log_figure(&mut self, _name: &str, _figure: &RdFigure) -> Result<()> {
        Ok(())
    }

    /// Record a value distribution
    fn log_distribution(&mut self, _name: &str, _values: &[f64], _step: usize) -> Result<()> {
        Ok(())
    }

    /// Record a scalar metric
    fn log_scalar(&mut self, _name: &str, _value: f64, _step: usize) -> Result<()> {
        Ok(())
    }
}

/// Dispatches logging calls to every sink advertising the capability
#[derive(Default)]
pub struct LoggerHub {
    sinks: Vec<Box<dyn LoggerSink>>,
}

impl LoggerHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn add_sink(&mut self, sink: Box<dyn LoggerSink>) {
        self.sinks.push(sink);
    }

    /// Builder-style sink registration
    pub fn with_sink(mut self, sink: Box<dyn LoggerSink>) -> Self {
        self.add_sink(sink);
        self
    }

    /// Number of registered sinks
    pub fn num_sinks(&self) -> usize {
        self.sinks.len()
    }

    fn capable(&mut self, capability: LogCapability) -> impl Iterator<Item = &mut Box<dyn LoggerSink>> {
        self.sinks
            .iter_mut()
            .filter(move |sink| sink.capabilities().contains(&capability))
    }

    /// Log an artifact to all Artifact-capable sinks
    pub fn log_artifact(&mut self, tag: &str, path: &Path) -> Result<()> {
        for sink in self.capable(LogCapability::Artifact) {
            sink.log_artifact(tag, path)?;
        }
        Ok(())
    }

    /// Log a figure to all Figure-capable sinks
    pub fn log_figure(&mut self, name: &str, figure: &RdFigure) -> Result<()> {
        for sink in self.capable(LogCapability::Figure) {
            sink.log_figure(name, figure)?;
        }
        Ok(())
    }

    /// Log a distribution to all Distribution-capable sinks
    pub fn log_distribution(&mut self, name: &str, values: &[f64], step: usize) -> Result<()> {
        for sink in self.capable(LogCapability::Distribution) {
            sink.log_distribution(name, values, step)?;
        }
        Ok(())
    }

    /// Log a scalar to all Scalar-capable sinks
    pub fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        for sink in self.capable(LogCapability::Scalar) {
            sink.log_scalar(name, value, step)?;
        }
        Ok(())
    }
}

/// Scalar sink writing through `tracing`
pub struct ConsoleLogger;

impl LoggerSink for ConsoleLogger {
    fn name(&self) -> &str {
        "console"
    }

    fn capabilities(&self) -> &[LogCapability] {
        &[LogCapability::Scalar]
    }

    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        info!(metric = name, value, step, "scalar");
        Ok(())
    }
}

/// Scalar/distribution sink appending JSON lines to a file
pub struct JsonlLogger {
    path: PathBuf,
    file: File,
}

impl JsonlLogger {
    /// Create or append to the JSON-lines file at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Path of the underlying JSON-lines file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, record: serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl LoggerSink for JsonlLogger {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn capabilities(&self) -> &[LogCapability] {
        &[LogCapability::Scalar, LogCapability::Distribution]
    }

    fn log_scalar(&mut self, name: &str, value: f64, step: usize) -> Result<()> {
        self.write_record(json!({
            "kind": "scalar",
            "name": name,
            "value": value,
            "step": step,
            "at": Utc::now().to_rfc3339(),
        }))
    }

    fn log_distribution(&mut self, name: &str, values: &[f64], step: usize) -> Result<()> {
        self.write_record(json!({
            "kind": "distribution",
            "name": name,
            "values": values,
            "step": step,
            "at": Utc::now().to_rfc3339(),
        }))
    }
}

/// Figure/artifact sink writing files under a directory
pub struct FigureDirLogger {
    dir: PathBuf,
}

impl FigureDirLogger {
    /// Create a sink writing into `dir`
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl LoggerSink for FigureDirLogger {
    fn name(&self) -> &str {
        "figure-dir"
    }

    fn capabilities(&self) -> &[LogCapability] {
        &[LogCapability::Figure, LogCapability::Artifact]
    }

    fn log_figure(&mut self, name: &str, figure: &RdFigure) -> Result<()> {
        let svg = figure.render_svg(960, 600)?;
        std::fs::write(self.dir.join(format!("{name}.svg")), svg)?;
        Ok(())
    }

    fn log_artifact(&mut self, tag: &str, path: &Path) -> Result<()> {
        std::fs::copy(path, self.dir.join(tag))?;
        Ok(())
    }
}
