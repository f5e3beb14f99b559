//! The staged input file the solver reads, and its cleanup.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::discovery::ModelFile;
use crate::error::{BatchError, BatchResult};

/// Fixed name the solver input script refers to.
pub const STAGED_INPUT: &str = "current_model.GYRE";

/// Owner of `<work_dir>/current_model.GYRE`.
///
/// The file is removed by [`StagedInput::finish`] or, failing that, when the
/// value is dropped. A stale file left by an earlier run is overwritten by
/// the first [`stage`](StagedInput::stage) and removed with the rest.
#[derive(Debug)]
pub struct StagedInput {
    path: PathBuf,
    finished: bool,
}

impl StagedInput {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: work_dir.join(STAGED_INPUT),
            finished: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy `model` over the staged input.
    pub async fn stage(&self, model: &ModelFile) -> BatchResult<u64> {
        let bytes = tokio::fs::copy(&model.path, &self.path)
            .await
            .map_err(|source| BatchError::Stage {
                model: model.file_name.clone(),
                source,
            })?;
        debug!(model = %model.file_name, bytes, "Staged model");
        Ok(bytes)
    }

    /// Remove the staged input. A missing file is fine.
    pub fn finish(mut self) -> BatchResult<()> {
        self.finished = true;
        remove_if_present(&self.path).map_err(|source| BatchError::Cleanup {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for StagedInput {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = remove_if_present(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged input");
        }
    }
}

/// Remove `path`, treating "not found" as success.
pub(crate) fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
