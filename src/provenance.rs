//! Experiment provenance logging
//!
//! A one-shot side effect at experiment start: source diffs and the
//! dependency list captured into artifact sinks. Anything missing (a
//! patch file that was never written, a hub without an Artifact-capable
//! sink) is skipped with a warning; provenance must never fail a run.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::logging::LoggerHub;

/// Dependency-list files captured alongside the diffs
const DEPENDENCY_ARTIFACTS: &[(&str, &str)] = &[
    ("crate_list.txt", "crate_list.txt"),
    ("Cargo.lock", "Cargo.lock"),
];

/// Provenance of the source tree an experiment runs from
pub struct SourceProvenance {
    src_root: PathBuf,
    packages: Vec<String>,
}

impl SourceProvenance {
    /// Create a provenance record rooted at the run's source snapshot
    pub fn new(src_root: impl AsRef<Path>) -> Self {
        Self {
            src_root: src_root.as_ref().to_path_buf(),
            packages: Vec::new(),
        }
    }

    /// Track a package whose `<package>.patch` diff should be captured
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    /// Capture all provenance artifacts into the hub.
    ///
    /// Missing files are individually skipped; the call itself only fails
    /// on sink write errors.
    pub fn log_to(&self, hub: &mut LoggerHub) -> Result<()> {
        for package in &self.packages {
            let tag = format!("{package}_git_diff");
            self.log_artifact(hub, &tag, &format!("{package}.patch"))?;
        }
        for (tag, filename) in DEPENDENCY_ARTIFACTS {
            self.log_artifact(hub, tag, filename)?;
        }
        Ok(())
    }

    fn log_artifact(&self, hub: &mut LoggerHub, tag: &str, filename: &str) -> Result<()> {
        let path = self.src_root.join(filename);
        if !path.is_file() {
            warn!(artifact = tag, path = %path.display(), "provenance artifact missing, skipping");
            return Ok(());
        }
        hub.log_artifact(tag, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogCapability, LoggerSink};
    use std::sync::{Arc, Mutex};

    struct ArtifactRecorder {
        tags: Arc<Mutex<Vec<String>>>,
    }

    impl LoggerSink for ArtifactRecorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn capabilities(&self) -> &[LogCapability] {
            &[LogCapability::Artifact]
        }

        fn log_artifact(&mut self, tag: &str, _path: &Path) -> Result<()> {
            self.tags.lock().unwrap().push(tag.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_logs_only_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nic-trainer.patch"), "diff").unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "[[package]]").unwrap();
        // crate_list.txt intentionally absent.

        let tags = Arc::new(Mutex::new(Vec::new()));
        let mut hub =
            LoggerHub::new().with_sink(Box::new(ArtifactRecorder { tags: tags.clone() }));

        SourceProvenance::new(dir.path())
            .with_package("nic-trainer")
            .with_package("nic-models")
            .log_to(&mut hub)
            .unwrap();

        let tags = tags.lock().unwrap().clone();
        assert_eq!(tags, vec!["nic-trainer_git_diff", "Cargo.lock"]);
    }

    #[test]
    fn test_no_artifact_sink_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.lock"), "[[package]]").unwrap();

        let mut hub = LoggerHub::new();
        SourceProvenance::new(dir.path()).log_to(&mut hub).unwrap();
    }
}
