//! Batch configuration and input validation.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collect::{enabled_modes, OutputMode, DEFAULT_OUT_SUFFIX};
use crate::discovery::DEFAULT_PATTERN;
use crate::error::{BatchError, BatchResult};
use crate::workdir::expand_home;

/// Environment variable naming the GYRE installation.
pub const GYRE_DIR_ENV: &str = "GYRE_DIR";

/// Location of the executable below `$GYRE_DIR`.
pub const GYRE_BIN_RELATIVE: &str = "bin/gyre";

/// Everything a batch run needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    /// Directory holding the models; results are written here too.
    pub work_dir: PathBuf,

    /// Solver executable.
    pub solver_executable: PathBuf,

    /// Solver input script, passed as the solver's only argument.
    pub input_script: PathBuf,

    /// Glob selecting model files by name.
    pub pattern: String,

    /// Suffix appended to archived summaries.
    pub out_suffix: String,

    /// Archive `summary.txt` after each run.
    pub adiabatic: bool,

    /// Archive `summary_nad.txt` after each run.
    pub nonadiabatic: bool,

    /// Per-model solver time limit.
    #[serde(default, with = "duration_ms")]
    pub timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            solver_executable: PathBuf::from(GYRE_BIN_RELATIVE),
            input_script: PathBuf::from("gyre.in"),
            pattern: DEFAULT_PATTERN.to_string(),
            out_suffix: DEFAULT_OUT_SUFFIX.to_string(),
            adiabatic: true,
            nonadiabatic: false,
            timeout: None,
        }
    }
}

impl BatchConfig {
    /// Output modes to collect, in order.
    pub fn modes(&self) -> Vec<OutputMode> {
        enabled_modes(self.adiabatic, self.nonadiabatic)
    }

    /// Check the solver, script and work directory, and make every path
    /// absolute relative to `base` so later directory changes cannot
    /// invalidate them.
    pub fn validate(mut self, base: &Path) -> BatchResult<Self> {
        self.solver_executable = absolutize(base, &self.solver_executable);
        if !self.solver_executable.is_file() {
            return Err(BatchError::SolverNotFound(self.solver_executable));
        }

        self.input_script = absolutize(base, &self.input_script);
        if !self.input_script.exists() {
            return Err(BatchError::InputScriptNotFound(self.input_script));
        }

        self.work_dir = absolutize(base, &self.work_dir);
        if !self.work_dir.is_dir() {
            return Err(BatchError::WorkDir {
                path: self.work_dir,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        Ok(self)
    }
}

/// Pick the solver executable: an explicit path wins, otherwise
/// `$GYRE_DIR/bin/gyre`.
pub fn resolve_solver_executable(
    explicit: Option<PathBuf>,
    gyre_dir: Option<OsString>,
) -> BatchResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    match gyre_dir {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir).join(GYRE_BIN_RELATIVE)),
        _ => Err(BatchError::GyreDirUnset),
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
