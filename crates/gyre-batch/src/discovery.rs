//! Model discovery in the batch directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::{glob_with, MatchOptions, Pattern};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BatchError, BatchResult};
use crate::staging::STAGED_INPUT;

/// Default pattern selecting model files.
pub const DEFAULT_PATTERN: &str = "*.GYRE";

/// One input model selected for the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelFile {
    /// Path to the model, below the batch directory unless the pattern was
    /// absolute.
    pub path: PathBuf,
    /// Final path component.
    pub file_name: String,
    /// File name with up to two trailing extensions removed.
    pub base_name: String,
}

impl ModelFile {
    /// Build a model entry from a matched path.
    pub fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_name = base_name(&file_name);
        Self {
            path,
            file_name,
            base_name,
        }
    }
}

/// Strip up to two extensions: `a.GYRE` -> `a`, `m.mesa.GYRE` -> `m`.
///
/// Leading-dot names such as `.GYRE` keep their dot, as `Path::file_stem` does.
pub fn base_name(file_name: &str) -> String {
    let once = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    Path::new(&once)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(once)
}

/// Expand `pattern` inside `dir` and return the matching regular files,
/// sorted by path.
///
/// The pattern may name subdirectories (`profiles/*.GYRE`) or be absolute.
/// Wildcards do not match a leading dot, so hidden files are only selected
/// by a pattern that spells the dot out. The staged input file is never
/// returned.
pub fn discover_models(dir: &Path, pattern: &str) -> BatchResult<Vec<ModelFile>> {
    let invalid = |source| BatchError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    };
    // Validate on its own so a bad pattern is reported as written.
    Pattern::new(pattern).map_err(invalid)?;

    let discover_err = |source| BatchError::Discover {
        dir: dir.to_path_buf(),
        source,
    };
    if !std::fs::metadata(dir).map_err(discover_err)?.is_dir() {
        return Err(discover_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not a directory",
        )));
    }

    let full_pattern = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        let base = Pattern::escape(&dir.to_string_lossy());
        Path::new(&base).join(pattern).to_string_lossy().into_owned()
    };
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };

    let staged = dir.join(STAGED_INPUT);
    let mut paths = Vec::new();
    for entry in glob_with(&full_pattern, options).map_err(invalid)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %e.path().display(), error = %e.error(), "Skipping unreadable entry");
                continue;
            }
        };
        if path == staged {
            continue;
        }
        // Follows symlinks, so linked models are accepted.
        if std::fs::metadata(&path).map(|m| m.is_file()).unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let models: Vec<ModelFile> = paths.into_iter().map(ModelFile::new).collect();

    let mut seen: BTreeMap<&str, &Path> = BTreeMap::new();
    for model in &models {
        if let Some(first) = seen.insert(&model.base_name, &model.path) {
            return Err(BatchError::DuplicateBaseName {
                base_name: model.base_name.clone(),
                first: relative_label(dir, first),
                second: relative_label(dir, &model.path),
            });
        }
    }

    debug!(dir = %dir.display(), pattern, count = models.len(), "Discovered models");
    Ok(models)
}

fn relative_label(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir).unwrap_or(path).display().to_string()
}
