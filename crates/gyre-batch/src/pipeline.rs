//! The batch control loop.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::collect::{clear_stale_outputs, collect_output};
use crate::config::BatchConfig;
use crate::discovery::{discover_models, ModelFile};
use crate::error::{BatchError, BatchResult, SolverError};
use crate::solver::Solver;
use crate::staging::StagedInput;

/// What happened to one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutcome {
    /// Model file name.
    pub model: String,

    /// Base name used for the result files.
    pub base_name: String,

    /// Solver exit code.
    pub exit_code: i32,

    /// Solver wall-clock time in milliseconds.
    pub duration_ms: u64,

    /// Archived summaries, in collection order.
    pub results: Vec<PathBuf>,
}

/// Result of a complete batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Batch directory.
    pub work_dir: PathBuf,

    /// When the batch started.
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// One entry per model, in processing order.
    pub models: Vec<ModelOutcome>,
}

impl BatchReport {
    /// Number of models processed.
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// All result files, in the order they were written.
    pub fn result_files(&self) -> Vec<&PathBuf> {
        self.models.iter().flat_map(|m| m.results.iter()).collect()
    }
}

/// Runs one solver over every discovered model, one at a time.
pub struct BatchPipeline<S> {
    config: BatchConfig,
    solver: S,
}

impl<S: Solver> BatchPipeline<S> {
    /// `config` is expected to have passed [`BatchConfig::validate`].
    pub fn new(config: BatchConfig, solver: S) -> Self {
        Self { config, solver }
    }

    /// Process every model or stop at the first failure.
    ///
    /// Results archived before a failure stay on disk. The staged input is
    /// removed whether the batch completes or not.
    pub async fn run(&self, cancel: &CancelSignal) -> BatchResult<BatchReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let work_dir = &self.config.work_dir;
        let modes = self.config.modes();

        let models = discover_models(work_dir, &self.config.pattern)?;
        info!(
            work_dir = %work_dir.display(),
            pattern = %self.config.pattern,
            models = models.len(),
            "Starting batch"
        );
        if modes.is_empty() {
            warn!("Both output modes are disabled; solver summaries will not be archived");
        }

        let staged = StagedInput::new(work_dir);
        let mut outcomes = Vec::with_capacity(models.len());

        for (index, model) in models.iter().enumerate() {
            let span = info_span!("model", index, name = %model.file_name);
            let outcome = self.process(model, &staged, cancel).instrument(span).await?;
            outcomes.push(outcome);
        }

        staged.finish()?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(models = outcomes.len(), duration_ms, "Calculations are done");

        Ok(BatchReport {
            work_dir: work_dir.clone(),
            started_at,
            duration_ms,
            models: outcomes,
        })
    }

    async fn process(
        &self,
        model: &ModelFile,
        staged: &StagedInput,
        cancel: &CancelSignal,
    ) -> BatchResult<ModelOutcome> {
        let work_dir = &self.config.work_dir;
        let modes = self.config.modes();

        if cancel.is_cancelled() {
            return Err(BatchError::Solver {
                model: model.file_name.clone(),
                source: SolverError::Cancelled,
            });
        }

        staged.stage(model).await?;
        info!(model = %model.file_name, "Model prepared for calculations");

        clear_stale_outputs(work_dir, model, &modes)?;

        let run = self
            .solver
            .run(&self.config.input_script, work_dir, cancel)
            .await
            .map_err(|source| BatchError::Solver {
                model: model.file_name.clone(),
                source,
            })?;
        debug!(exit_code = run.exit_code, duration_ms = run.duration_ms, "Solver finished");

        let mut results = Vec::with_capacity(modes.len());
        for mode in modes {
            results.push(collect_output(work_dir, model, mode, &self.config.out_suffix).await?);
        }

        info!(model = %model.file_name, "Model calculated");
        Ok(ModelOutcome {
            model: model.file_name.clone(),
            base_name: model.base_name.clone(),
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::OutputMode;
    use crate::solver::SolverRun;
    use crate::staging::STAGED_INPUT;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// Copies the staged model into whichever summaries it is told to write,
    /// and records the order of the models it saw.
    #[derive(Default)]
    struct EchoSolver {
        outputs: Vec<OutputMode>,
        fail_on: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Solver for EchoSolver {
        async fn run(
            &self,
            _input_script: &Path,
            work_dir: &Path,
            _cancel: &CancelSignal,
        ) -> Result<SolverRun, SolverError> {
            let staged = std::fs::read_to_string(work_dir.join(STAGED_INPUT)).unwrap();
            self.seen.lock().unwrap().push(staged.clone());
            if self.fail_on.as_deref() == Some(staged.as_str()) {
                return Err(SolverError::Failed { code: Some(1) });
            }
            for mode in &self.outputs {
                std::fs::write(work_dir.join(mode.solver_output()), &staged).unwrap();
            }
            Ok(SolverRun {
                exit_code: 0,
                duration_ms: 1,
            })
        }
    }

    fn setup(models: &[&str]) -> (tempfile::TempDir, BatchConfig) {
        let dir = tempfile::tempdir().unwrap();
        for name in models {
            std::fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let config = BatchConfig {
            work_dir: dir.path().to_path_buf(),
            solver_executable: PathBuf::from("/unused"),
            input_script: dir.path().join("gyre.in"),
            ..BatchConfig::default()
        };
        (dir, config)
    }

    #[tokio::test]
    async fn test_processes_models_in_order() {
        let (dir, config) = setup(&["b.GYRE", "a.GYRE"]);
        let solver = EchoSolver {
            outputs: vec![OutputMode::Adiabatic],
            ..Default::default()
        };
        let pipeline = BatchPipeline::new(config, solver);

        let report = pipeline.run(&CancelSignal::new()).await.unwrap();

        assert_eq!(report.model_count(), 2);
        assert_eq!(
            *pipeline.solver.seen.lock().unwrap(),
            vec!["a.GYRE".to_string(), "b.GYRE".to_string()]
        );
        assert_eq!(
            report.result_files(),
            vec![
                &dir.path().join("a_summary.txt"),
                &dir.path().join("b_summary.txt")
            ]
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b_summary.txt")).unwrap(),
            "b.GYRE"
        );
        assert!(!dir.path().join(STAGED_INPUT).exists());
    }

    #[tokio::test]
    async fn test_solver_failure_stops_batch_and_cleans_up() {
        let (dir, config) = setup(&["a.GYRE", "b.GYRE", "c.GYRE"]);
        let solver = EchoSolver {
            outputs: vec![OutputMode::Adiabatic],
            fail_on: Some("b.GYRE".into()),
            ..Default::default()
        };
        let pipeline = BatchPipeline::new(config, solver);

        let err = pipeline.run(&CancelSignal::new()).await.unwrap_err();

        match err {
            BatchError::Solver { model, .. } => assert_eq!(model, "b.GYRE"),
            other => panic!("expected Solver error, got {other:?}"),
        }
        assert_eq!(pipeline.solver.seen.lock().unwrap().len(), 2);
        assert!(dir.path().join("a_summary.txt").exists());
        assert!(!dir.path().join("b_summary.txt").exists());
        assert!(!dir.path().join("c_summary.txt").exists());
        assert!(!dir.path().join(STAGED_INPUT).exists());
    }

    #[tokio::test]
    async fn test_missing_nonadiabatic_output_aborts() {
        let (dir, mut config) = setup(&["a.GYRE"]);
        config.nonadiabatic = true;
        let solver = EchoSolver {
            outputs: vec![OutputMode::Adiabatic],
            ..Default::default()
        };

        let err = BatchPipeline::new(config, solver)
            .run(&CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BatchError::Collect {
                mode: OutputMode::Nonadiabatic,
                ..
            }
        ));
        assert!(dir.path().join("a_summary.txt").exists());
    }

    #[tokio::test]
    async fn test_stale_summary_is_not_archived() {
        let (dir, config) = setup(&["a.GYRE"]);
        std::fs::write(dir.path().join("summary.txt"), b"from a previous run").unwrap();
        let solver = EchoSolver::default();

        let err = BatchPipeline::new(config, solver)
            .run(&CancelSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Collect { .. }));
        assert!(!dir.path().join("a_summary.txt").exists());
    }

    #[tokio::test]
    async fn test_no_modes_still_runs_solver() {
        let (dir, mut config) = setup(&["a.GYRE"]);
        config.adiabatic = false;
        let pipeline = BatchPipeline::new(config, EchoSolver::default());

        let report = pipeline.run(&CancelSignal::new()).await.unwrap();

        assert_eq!(report.model_count(), 1);
        assert!(report.result_files().is_empty());
        assert_eq!(pipeline.solver.seen.lock().unwrap().len(), 1);
        assert!(!dir.path().join(STAGED_INPUT).exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let (dir, config) = setup(&["a.GYRE", "b.GYRE"]);
        let pipeline = BatchPipeline::new(config, EchoSolver::default());
        let cancel = CancelSignal::new();
        cancel.cancel();

        let err = pipeline.run(&cancel).await.unwrap_err();

        assert_eq!(err.exit_code(), 130);
        assert!(pipeline.solver.seen.lock().unwrap().is_empty());
        assert!(!dir.path().join(STAGED_INPUT).exists());
    }

    #[test]
    fn test_report_serializes() {
        let report = BatchReport {
            work_dir: PathBuf::from("/runs"),
            started_at: Utc::now(),
            duration_ms: 10,
            models: vec![ModelOutcome {
                model: "a.GYRE".into(),
                base_name: "a".into(),
                exit_code: 0,
                duration_ms: 5,
                results: vec![PathBuf::from("/runs/a_summary.txt")],
            }],
        };
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["models"][0]["base_name"], "a");
        assert_eq!(json["models"][0]["results"][0], "/runs/a_summary.txt");
    }
}
