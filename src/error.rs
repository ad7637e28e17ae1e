use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::merger::MergeTypeError;

/// Main application error type for failures that abort a run
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn worker: {details}")]
    WorkerSpawn { details: String },

    #[error("Worker protocol error: {details}")]
    WorkerProtocol { details: String },

    #[error("Worker did not reply within {timeout:?}")]
    WorkerTimeout { timeout: Duration },

    #[error(transparent)]
    Merge(#[from] MergeTypeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-document errors raised by the analyzer
///
/// These never abort a run: the worker turns them into failure markers.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed XML in {path} at byte {position}: {details}")]
    Parse {
        path: PathBuf,
        position: u64,
        details: String,
    },
}

impl AnalyzeError {
    /// Path of the document that failed
    pub fn path(&self) -> &PathBuf {
        match self {
            AnalyzeError::Read { path, .. } | AnalyzeError::Parse { path, .. } => path,
        }
    }
}

impl From<crate::config::ConfigError> for StatsError {
    fn from(err: crate::config::ConfigError) -> Self {
        StatsError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StatsError>;
