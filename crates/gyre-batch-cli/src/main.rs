//! run-gyre - run GYRE for every selected model in a directory.
//!
//! Each model matching `--pattern` is copied to `current_model.GYRE`, GYRE
//! is run with `--gyre-input`, and the resulting `summary.txt` (and with
//! `--nad`, `summary_nad.txt`) is renamed after the model.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gyre_batch::{
    resolve_solver_executable, BatchConfig, BatchError, BatchPipeline, BatchReport,
    CancelSignal, GyreSolver, WorkDirGuard, DEFAULT_OUT_SUFFIX, DEFAULT_PATTERN,
    GYRE_DIR_ENV,
};
use tracing::{debug, info, warn, Level};

#[derive(Debug, Parser)]
#[command(name = "run-gyre")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run gyre for multiple selected models in a directory", long_about = None)]
struct Cli {
    /// Directory holding the models; results are written here
    #[arg(short, long)]
    work_dir: PathBuf,

    /// The location of the gyre input script
    #[arg(short = 'i', long)]
    gyre_input: PathBuf,

    /// Path to the gyre executable (default: <gyre-dir>/bin/gyre)
    #[arg(short = 'g', long)]
    gyre_location: Option<PathBuf>,

    /// GYRE installation directory
    #[arg(long, env = GYRE_DIR_ENV)]
    gyre_dir: Option<OsString>,

    /// Glob pattern selecting the models
    #[arg(short, long, default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// Suffix of the archived summary files
    #[arg(short, long, default_value = DEFAULT_OUT_SUFFIX)]
    out_suffix: String,

    /// Also archive the nonadiabatic summary
    #[arg(long)]
    nad: bool,

    /// Do not archive the adiabatic summary
    #[arg(long)]
    disable_ad: bool,

    /// Kill a gyre run that takes longer than this (e.g. 90s, 2h)
    #[arg(long)]
    timeout: Option<humantime::Duration>,

    /// Write a JSON report of the batch here on success
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn to_config(&self) -> Result<BatchConfig, BatchError> {
        let solver_executable =
            resolve_solver_executable(self.gyre_location.clone(), self.gyre_dir.clone())?;
        Ok(BatchConfig {
            work_dir: self.work_dir.clone(),
            solver_executable,
            input_script: self.gyre_input.clone(),
            pattern: self.pattern.clone(),
            out_suffix: self.out_suffix.clone(),
            adiabatic: !self.disable_ad,
            nonadiabatic: self.nad,
            timeout: self.timeout.map(Into::into),
        })
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    gyre_batch::init_tracing(cli.json, level);

    let code = match run(cli) {
        Ok(()) => {
            println!("Calculations are done!");
            0
        }
        Err(e) => {
            // BatchError messages already include their cause.
            match e.downcast_ref::<BatchError>() {
                Some(batch) => {
                    eprintln!("Error: {batch}");
                    batch.exit_code()
                }
                None => {
                    eprintln!("Error: {e:#}");
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.to_config()?;
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let config = config.validate(&cwd)?;
    let rendered = serde_json::to_string(&config)?;
    debug!(config = %rendered, "Resolved configuration");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = {
        let guard = WorkDirGuard::enter(&config.work_dir)?;
        let config = BatchConfig {
            work_dir: guard.path().to_path_buf(),
            ..config
        };
        runtime.block_on(run_batch(config))?
    };

    if let Some(path) = cli.report.as_deref() {
        write_report(path, &report)?;
    }
    Ok(())
}

async fn run_batch(config: BatchConfig) -> Result<BatchReport, BatchError> {
    let cancel = CancelSignal::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the batch");
            on_signal.cancel();
        }
    });

    let solver = GyreSolver::new(&config.solver_executable).with_timeout(config.timeout);
    let report = BatchPipeline::new(config, solver).run(&cancel).await?;
    info!(models = report.model_count(), "Batch finished");
    Ok(report)
}

fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Saved report");
    Ok(())
}
