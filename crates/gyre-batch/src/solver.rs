//! Running the external solver.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::SolverError;

/// Outcome of a solver run that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverRun {
    /// Exit code (0 unless a custom solver reports otherwise).
    pub exit_code: i32,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Anything that can process the staged model in a directory.
#[async_trait]
pub trait Solver: Send + Sync {
    /// Run once against `input_script` with `work_dir` as the cwd, blocking
    /// the batch until it finishes, times out or is cancelled.
    async fn run(
        &self,
        input_script: &Path,
        work_dir: &Path,
        cancel: &CancelSignal,
    ) -> Result<SolverRun, SolverError>;
}

/// The GYRE executable.
#[derive(Debug, Clone)]
pub struct GyreSolver {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl GyreSolver {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    /// Kill the solver if a single run takes longer than `limit`.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

#[async_trait]
impl Solver for GyreSolver {
    async fn run(
        &self,
        input_script: &Path,
        work_dir: &Path,
        cancel: &CancelSignal,
    ) -> Result<SolverRun, SolverError> {
        let start = Instant::now();

        debug!(
            executable = %self.executable.display(),
            script = %input_script.display(),
            "Spawning solver"
        );

        // stdio is inherited so the solver's progress reaches the terminal.
        let mut child = Command::new(&self.executable)
            .arg(input_script)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SolverError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let waited = tokio::select! {
            status = child.wait() => Ok(status),
            _ = deadline => Err(Interrupted::TimedOut),
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        };

        let status = match waited {
            Ok(status) => status.map_err(SolverError::Wait)?,
            Err(Interrupted::TimedOut) => {
                let limit = self.timeout.unwrap_or_default();
                warn!(limit_ms = limit.as_millis() as u64, "Solver timed out, killing it");
                kill(&mut child).await;
                return Err(SolverError::TimedOut { limit });
            }
            Err(Interrupted::Cancelled) => {
                warn!("Solver cancelled, killing it");
                kill(&mut child).await;
                return Err(SolverError::Cancelled);
            }
        };

        let exit_code = check_status(status, cancel)?;
        Ok(SolverRun {
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Map a finished solver's status to its exit code or error.
fn check_status(status: ExitStatus, cancel: &CancelSignal) -> Result<i32, SolverError> {
    if status.success() {
        return Ok(status.code().unwrap_or(0));
    }
    // Ctrl-C reaches the whole foreground process group, so the solver can
    // die of the same SIGINT before the cancel branch is polled.
    if cancel.is_cancelled() {
        warn!(code = ?status.code(), "Solver stopped after cancellation");
        return Err(SolverError::Cancelled);
    }
    Err(SolverError::Failed {
        code: status.code(),
    })
}

enum Interrupted {
    TimedOut,
    Cancelled,
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill solver process");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    // The fake solver is `/bin/sh` and the "input script" is a shell script,
    // so nothing freshly written is ever exec'd directly.
    fn input(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake.in");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn sh() -> GyreSolver {
        GyreSolver::new("/bin/sh")
    }

    #[tokio::test]
    async fn test_runs_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = input(dir.path(), "pwd > seen_cwd.txt\n");

        let run = sh()
            .run(&script, dir.path(), &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(run.exit_code, 0);
        let seen = std::fs::read_to_string(dir.path().join("seen_cwd.txt")).unwrap();
        assert_eq!(
            std::fs::canonicalize(seen.trim()).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = input(dir.path(), "exit 4\n");

        let err = sh()
            .run(&script, dir.path(), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::Failed { code: Some(4) }));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GyreSolver::new(dir.path().join("no-such-gyre"))
            .run(Path::new("gyre.in"), dir.path(), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_solver() {
        let dir = tempfile::tempdir().unwrap();
        let script = input(dir.path(), "exec sleep 30\n");
        let solver = sh().with_timeout(Some(Duration::from_millis(200)));

        let started = Instant::now();
        let err = solver
            .run(&script, dir.path(), &CancelSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SolverError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_signal_death_after_cancel_is_cancellation() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait status 2: terminated by SIGINT.
        let interrupted = ExitStatus::from_raw(2);
        let cancel = CancelSignal::new();
        assert!(matches!(
            check_status(interrupted, &cancel),
            Err(SolverError::Failed { code: None })
        ));

        cancel.cancel();
        assert!(matches!(
            check_status(interrupted, &cancel),
            Err(SolverError::Cancelled)
        ));
        assert_eq!(check_status(ExitStatus::from_raw(0), &cancel).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_solver_interrupted_with_its_group_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let script = input(dir.path(), "kill -INT $$\nsleep 1\n");
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = sh().run(&script, dir.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, SolverError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_kills_solver() {
        let dir = tempfile::tempdir().unwrap();
        let script = input(dir.path(), "exec sleep 30\n");
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = sh().run(&script, dir.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, SolverError::Cancelled));
    }
}
