//! gyre-batch: run GYRE over every model in a directory.
//!
//! GYRE reads one fixed-name model and writes fixed-name summaries, so a
//! batch has to stage each model, run the solver, and archive the summaries
//! before the next run overwrites them. [`BatchPipeline`] does exactly that,
//! one model at a time, and stops at the first failure.

pub mod cancel;
pub mod collect;
pub mod config;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod solver;
pub mod staging;
pub mod telemetry;
pub mod workdir;

pub use cancel::CancelSignal;
pub use collect::{OutputMode, DEFAULT_OUT_SUFFIX};
pub use config::{resolve_solver_executable, BatchConfig, GYRE_DIR_ENV};
pub use discovery::{discover_models, ModelFile, DEFAULT_PATTERN};
pub use error::{BatchError, BatchResult, ErrorKind, SolverError};
pub use pipeline::{BatchPipeline, BatchReport, ModelOutcome};
pub use solver::{GyreSolver, Solver, SolverRun};
pub use staging::{StagedInput, STAGED_INPUT};
pub use telemetry::init_tracing;
pub use workdir::{expand_home, WorkDirGuard};
