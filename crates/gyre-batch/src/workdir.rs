//! Scoped change of the process working directory.
//!
//! The pipeline itself works on explicit paths. [`WorkDirGuard`] exists for
//! the outermost boundary only, so that anything the solver or the user's
//! input script resolves relative to the cwd lands in the batch directory.

use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::{BatchError, BatchResult};

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without a leading `~` component, and `~user` forms, are returned
/// unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(std::path::Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Switches the working directory on creation and restores it on drop.
#[derive(Debug)]
pub struct WorkDirGuard {
    original: PathBuf,
    current: PathBuf,
}

impl WorkDirGuard {
    /// Enter `target` (after `~` expansion), remembering the current directory.
    pub fn enter(target: &Path) -> BatchResult<Self> {
        let expanded = expand_home(target);
        let original = std::env::current_dir().map_err(|source| BatchError::WorkDir {
            path: expanded.clone(),
            source,
        })?;
        std::env::set_current_dir(&expanded).map_err(|source| BatchError::WorkDir {
            path: expanded.clone(),
            source,
        })?;
        let current = std::env::current_dir().unwrap_or(expanded);
        debug!(from = %original.display(), to = %current.display(), "Entered work directory");
        Ok(Self { original, current })
    }

    /// The directory that was entered, as reported by the OS.
    pub fn path(&self) -> &Path {
        &self.current
    }

    /// The directory that will be restored.
    pub fn original(&self) -> &Path {
        &self.original
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        match std::env::set_current_dir(&self.original) {
            Ok(()) => debug!(to = %self.original.display(), "Restored working directory"),
            Err(e) => error!(
                to = %self.original.display(),
                error = %e,
                "Failed to restore working directory"
            ),
        }
    }
}
