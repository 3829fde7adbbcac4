//! Error taxonomy for a pipeline run.
//!
//! Everything in [`PipelineError`] is fatal: the run aborts before any
//! output table is produced. Per-line decode failures are the one
//! recoverable case and are modelled separately as [`LineParseError`].

use std::fmt;
use std::path::PathBuf;

use crate::pipeline::model::Nanos;

/// Location of a raw line inside the input (file label + 1-based line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub file: std::sync::Arc<str>,
    pub line: u64,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "content of {source_label} does not appear to be a valid Spark event log \
         ({task_events} task events, {stage_events} stage events survived ingestion); \
         please check the content and retry"
    )]
    EmptyOrInvalidLog {
        source_label: String,
        task_events: usize,
        stage_events: usize,
    },

    #[error("schema violation at {origin}: {detail}")]
    SchemaViolation { origin: Origin, detail: String },

    #[error(
        "task {task_id} piece [{start}, {end}) is not contained in substage \
         ({interval_start}, {interval_end}]"
    )]
    SplitInvariantViolation {
        task_id: i64,
        start: Nanos,
        end: Nanos,
        interval_start: Nanos,
        interval_end: Nanos,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("invalid input {}: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn schema(origin: &Origin, detail: impl Into<String>) -> Self {
        Self::SchemaViolation {
            origin: origin.clone(),
            detail: detail.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }
}

/// A single line that could not be decoded. Recovered by skipping the line.
#[derive(Debug, Clone)]
pub struct LineParseError {
    pub origin: Origin,
    pub message: String,
}

impl fmt::Display for LineParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid line at {}: {}", self.origin, self.message)
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
