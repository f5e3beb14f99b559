//! Archiving solver summaries under per-model names.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::discovery::ModelFile;
use crate::error::{BatchError, BatchResult};
use crate::staging::remove_if_present;

/// Default suffix of archived summaries.
pub const DEFAULT_OUT_SUFFIX: &str = "_summary.txt";

/// Solver result categories, each with its own fixed output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    Adiabatic,
    Nonadiabatic,
}

impl OutputMode {
    /// Name the solver writes this summary to, inside the batch directory.
    pub fn solver_output(&self) -> &'static str {
        match self {
            OutputMode::Adiabatic => "summary.txt",
            OutputMode::Nonadiabatic => "summary_nad.txt",
        }
    }

    /// Archived name for a model: `<base><suffix>` or `<base>_nad<suffix>`.
    pub fn result_file_name(&self, base_name: &str, suffix: &str) -> String {
        match self {
            OutputMode::Adiabatic => format!("{base_name}{suffix}"),
            OutputMode::Nonadiabatic => format!("{base_name}_nad{suffix}"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputMode::Adiabatic => "adiabatic",
            OutputMode::Nonadiabatic => "nonadiabatic",
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Modes enabled by the two command-line toggles, in collection order.
pub fn enabled_modes(adiabatic: bool, nonadiabatic: bool) -> Vec<OutputMode> {
    let mut modes = Vec::with_capacity(2);
    if adiabatic {
        modes.push(OutputMode::Adiabatic);
    }
    if nonadiabatic {
        modes.push(OutputMode::Nonadiabatic);
    }
    modes
}

/// Move the solver's `mode` summary to the model's result file.
///
/// A missing summary means the solver did not produce this output, which
/// aborts the batch like any other I/O failure.
pub async fn collect_output(
    work_dir: &Path,
    model: &ModelFile,
    mode: OutputMode,
    suffix: &str,
) -> BatchResult<PathBuf> {
    let from = work_dir.join(mode.solver_output());
    let to = work_dir.join(mode.result_file_name(&model.base_name, suffix));

    tokio::fs::rename(&from, &to)
        .await
        .map_err(|source| BatchError::Collect {
            model: model.file_name.clone(),
            mode,
            source,
        })?;

    info!(model = %model.file_name, %mode, result = %to.display(), "Collected summary");
    Ok(to)
}

/// Remove leftover summaries for `modes` so a failed run cannot pass off an
/// older file as its own.
pub fn clear_stale_outputs(
    work_dir: &Path,
    model: &ModelFile,
    modes: &[OutputMode],
) -> BatchResult<()> {
    for &mode in modes {
        let path = work_dir.join(mode.solver_output());
        if path.exists() {
            debug!(path = %path.display(), "Removing stale solver output");
        }
        remove_if_present(&path).map_err(|source| BatchError::Collect {
            model: model.file_name.clone(),
            mode,
            source,
        })?;
    }
    Ok(())
}
