//! Report writers for replay results.
//!
//! The evaluator hands its in-memory report to a [`ReportWriter`]; the
//! writer owns the encoding and the destination.

use crate::aggregate::{ReplayMetrics, ReplayReport};
use crate::error::EvalError;
use crate::gate::GateOutcome;
use crate::runner::EpisodeRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Complete replay export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayExport {
    /// Master seed of the run
    pub seed: u64,

    /// `suite`, `batch` or a single episode name
    pub source: String,

    pub metrics: ReplayMetrics,

    /// Present when the quality gate was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateOutcome>,

    pub episodes: Vec<EpisodeRecord>,
}

impl ReplayExport {
    /// Creates an export from a finished report.
    pub fn new(source: &str, seed: u64, report: ReplayReport) -> Self {
        Self {
            seed,
            source: source.to_string(),
            metrics: report.metrics,
            gate: None,
            episodes: report.episodes,
        }
    }

    /// Attaches a gate verdict.
    pub fn with_gate(mut self, gate: GateOutcome) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn to_json(&self) -> Result<String, EvalError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Persists replay exports.
pub trait ReportWriter {
    fn write(&self, export: &ReplayExport) -> Result<(), EvalError>;
}

/// Writes pretty-printed JSON to a file.
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    path: PathBuf,
}

impl JsonReportWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportWriter for JsonReportWriter {
    fn write(&self, export: &ReplayExport) -> Result<(), EvalError> {
        let json = export.to_json()?;
        let mut file = File::create(&self.path)
            .map_err(|e| EvalError::report(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
