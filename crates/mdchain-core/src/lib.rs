//! mdchain - sequential GROMACS stage chaining
//!
//! Runs a prepare (`gmx grompp`) and run (`gmx mdrun`) pair for every stage
//! configuration, feeding each stage's output coordinates to the next:
//! - Resolves the stage order from a manifest or the data directory
//! - Selects single-process, MPI or tune_pme execution once up front
//! - Stops the whole chain at the first failing step

pub mod context;
pub mod error;
pub mod fakes;
pub mod mode;
pub mod pipeline;
pub mod plan;
pub mod resolver;
pub mod stage;
pub mod telemetry;
pub mod tools;

// Re-export key types
pub use context::{ChainInputs, RunContext, DEFAULT_TOPOLOGY};
pub use error::{ChainError, ChainResult, FAILURE_EXIT_CODE};
pub use mode::{ExecutionMode, ModeRequest, DEFAULT_HOST_LIST_VAR};
pub use pipeline::{ChainExecutor, ChainReport, FailureCause, PipelineState, StageRecord};
pub use plan::{ChainConfig, ChainPlan};
pub use resolver::{resolve_stages, StageSource};
pub use stage::{StageId, StageInvocation, Step};
pub use tools::{CommandLine, DryRunTools, GromacsTools, StageTools, StepOutcome, ToolConfig};
