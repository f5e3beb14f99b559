//! Error types for batch runs.

use std::path::PathBuf;
use std::time::Duration;

use crate::collect::OutputMode;

/// Broad failure category, used to pick a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad paths, patterns or environment, detected before any model runs.
    Configuration,
    /// A copy, move or directory listing failed mid-batch.
    Io,
    /// The solver could not be spawned or did not finish cleanly.
    Invocation,
    /// The batch was interrupted.
    Cancelled,
}

/// Errors produced while running the solver for one model.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("failed to spawn {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("solver exited with status {}", status_label(.code))]
    Failed { code: Option<i32> },

    #[error("solver timed out after {}", humanize(.limit))]
    TimedOut { limit: Duration },

    #[error("solver run cancelled")]
    Cancelled,

    #[error("failed to wait on solver: {0}")]
    Wait(#[source] std::io::Error),
}

fn status_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

fn humanize(d: &Duration) -> String {
    format!("{:.1}s", d.as_secs_f64())
}

/// Errors that abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("environment variable GYRE_DIR is not defined and no solver executable was given")]
    GyreDirUnset,

    #[error("{} is not a gyre executable", .0.display())]
    SolverNotFound(PathBuf),

    #[error("{} does not exist", .0.display())]
    InputScriptNotFound(PathBuf),

    #[error("cannot enter work directory {}: {source}", .path.display())]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("models {first} and {second} share base name {base_name:?}; their results would collide")]
    DuplicateBaseName {
        base_name: String,
        first: String,
        second: String,
    },

    #[error("cannot list models in {}: {source}", .dir.display())]
    Discover {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to stage {model}: {source}")]
    Stage {
        model: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver run for {model} failed: {source}")]
    Solver {
        model: String,
        #[source]
        source: SolverError,
    },

    #[error("unable to collect {mode} output for {model}: {source}")]
    Collect {
        model: String,
        mode: OutputMode,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to remove staged input {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BatchError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::GyreDirUnset
            | BatchError::SolverNotFound(_)
            | BatchError::InputScriptNotFound(_)
            | BatchError::WorkDir { .. }
            | BatchError::InvalidPattern { .. }
            | BatchError::DuplicateBaseName { .. } => ErrorKind::Configuration,
            BatchError::Discover { .. }
            | BatchError::Stage { .. }
            | BatchError::Collect { .. }
            | BatchError::Cleanup { .. } => ErrorKind::Io,
            BatchError::Solver {
                source: SolverError::Cancelled,
                ..
            } => ErrorKind::Cancelled,
            BatchError::Solver { .. } => ErrorKind::Invocation,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration => 2,
            ErrorKind::Io | ErrorKind::Invocation => 1,
            ErrorKind::Cancelled => 130,
        }
    }
}

/// Result type for batch operations.
pub type BatchResult<T> = std::result::Result<T, BatchError>;
