use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// Per-frame problems never show up here; they are counted in
/// [`ExtractionStats`](crate::ExtractionStats) instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid video {path}: {reason}")]
    InvalidVideo { path: PathBuf, reason: String },

    #[error("invalid cue list: {0}")]
    InvalidCues(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{tool} is not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }
}

/// Why a single frame capture failed. Always local to one task.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("capture exited with status {0}")]
    ExitStatus(String),

    #[error("capture finished but {0} was not written")]
    MissingOutput(PathBuf),

    #[error("I/O error during capture: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
