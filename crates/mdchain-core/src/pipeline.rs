//! Sequential stage execution.
//!
//! [`ChainExecutor`] is a small state machine:
//!
//! ```text
//! Idle -> Preparing(s) -> Executing(s) -> Advancing(s) -> Preparing(next) | Done
//!              |               |
//!              +---------------+--> Failed
//! ```
//!
//! Exactly one external step is outstanding at any time. The first failure
//! is terminal; nothing is skipped, retried or reordered.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use crate::context::{ChainInputs, RunContext};
use crate::error::{ChainError, ChainResult};
use crate::stage::{StageId, StageInvocation, Step};
use crate::telemetry;
use crate::tools::{StageTools, StepOutcome};

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The collaborator ran and exited unsuccessfully (`None` on a signal).
    Exit(Option<i32>),

    /// The collaborator could not be started.
    Launch {
        program: String,
        kind: std::io::ErrorKind,
    },
}

impl FailureCause {
    fn from_error(error: &ChainError) -> Self {
        match error {
            ChainError::Launch {
                program, source, ..
            } => FailureCause::Launch {
                program: program.clone(),
                kind: source.kind(),
            },
            ChainError::StageFailed { exit_code, .. } => FailureCause::Exit(*exit_code),
            _ => FailureCause::Exit(None),
        }
    }

    fn to_error(&self, stage: &StageId, step: Step) -> ChainError {
        match self {
            FailureCause::Exit(exit_code) => ChainError::StageFailed {
                stage: stage.to_string(),
                step,
                exit_code: *exit_code,
            },
            FailureCause::Launch { program, kind } => ChainError::Launch {
                stage: stage.to_string(),
                step,
                program: program.clone(),
                source: std::io::Error::from(*kind),
            },
        }
    }
}

/// Executor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Preparing(StageId),
    Executing(StageId),
    Advancing(StageId),
    Done,
    Failed {
        stage: StageId,
        step: Step,
        cause: FailureCause,
    },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }
}

/// One completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: StageId,
    pub input_coordinates: PathBuf,
    pub output_coordinates: PathBuf,
    pub started_at: DateTime<Utc>,
    pub prepare: StepOutcome,
    pub run: StepOutcome,
}

/// Result of a chain that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub stages: Vec<StageRecord>,
    pub previous_stage: Option<StageId>,
    pub final_coordinates: PathBuf,
    pub duration_ms: u64,
}

impl ChainReport {
    pub fn completed_count(&self) -> usize {
        self.stages.len()
    }
}

/// Prepared-but-not-yet-run stage.
struct Pending {
    invocation: StageInvocation,
    started_at: DateTime<Utc>,
    prepare: StepOutcome,
}

/// Drives the stage list through the collaborators one step at a time.
pub struct ChainExecutor {
    tools: Arc<dyn StageTools>,
    inputs: ChainInputs,
    queue: VecDeque<StageId>,
    max_warnings: Option<u32>,
    context: RunContext,
    state: PipelineState,
    pending: Option<Pending>,
    completed: Vec<StageRecord>,
    started: Option<Instant>,
}

impl ChainExecutor {
    pub fn new(
        tools: Arc<dyn StageTools>,
        inputs: ChainInputs,
        stages: Vec<StageId>,
        max_warnings: Option<u32>,
    ) -> Self {
        let context = RunContext::new(inputs.initial_coordinates.clone());
        Self {
            tools,
            inputs,
            queue: stages.into(),
            max_warnings,
            context,
            state: PipelineState::Idle,
            pending: None,
            completed: Vec::new(),
            started: None,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Stages completed so far.
    pub fn completed(&self) -> &[StageRecord] {
        &self.completed
    }

    /// Run every remaining stage, stopping at the first failure.
    pub async fn run(&mut self) -> ChainResult<ChainReport> {
        let started = *self.started.get_or_insert_with(Instant::now);
        telemetry::emit_chain_started(self.queue.len());

        loop {
            let state = std::mem::replace(&mut self.state, PipelineState::Idle);
            self.state = match state {
                PipelineState::Idle => self.next_stage(),
                PipelineState::Preparing(stage) => self.prepare(stage).await?,
                PipelineState::Executing(stage) => self.execute(stage).await?,
                PipelineState::Advancing(stage) => self.advance(stage),
                PipelineState::Done => {
                    self.state = PipelineState::Done;
                    let duration_ms = started.elapsed().as_millis() as u64;
                    telemetry::emit_chain_finished(self.completed.len(), duration_ms);
                    return Ok(ChainReport {
                        stages: self.completed.clone(),
                        previous_stage: self.context.previous_stage().cloned(),
                        final_coordinates: self.context.current_coordinates().to_path_buf(),
                        duration_ms,
                    });
                }
                PipelineState::Failed { stage, step, cause } => {
                    let error = cause.to_error(&stage, step);
                    self.state = PipelineState::Failed { stage, step, cause };
                    return Err(error);
                }
            };
        }
    }

    fn next_stage(&mut self) -> PipelineState {
        match self.queue.pop_front() {
            Some(stage) => PipelineState::Preparing(stage),
            None => PipelineState::Done,
        }
    }

    async fn prepare(&mut self, stage: StageId) -> ChainResult<PipelineState> {
        let invocation = StageInvocation::new(
            &self.inputs.data_dir,
            stage.clone(),
            self.context.current_coordinates().to_path_buf(),
            self.inputs.topology.clone(),
            self.max_warnings,
        );
        let started_at = Utc::now();

        let outcome = self.invoke(Step::Prepare, &invocation).await?;
        self.pending = Some(Pending {
            invocation,
            started_at,
            prepare: outcome,
        });
        Ok(PipelineState::Executing(stage))
    }

    async fn execute(&mut self, stage: StageId) -> ChainResult<PipelineState> {
        let Some(pending) = self.pending.take() else {
            // Executing is only entered from Preparing.
            return Ok(PipelineState::Preparing(stage));
        };

        let outcome = self.invoke(Step::Run, &pending.invocation).await?;
        self.completed.push(StageRecord {
            stage: stage.clone(),
            input_coordinates: pending.invocation.input_coordinates,
            output_coordinates: pending.invocation.output_coordinates,
            started_at: pending.started_at,
            prepare: pending.prepare,
            run: outcome,
        });
        Ok(PipelineState::Advancing(stage))
    }

    fn advance(&mut self, stage: StageId) -> PipelineState {
        let output = self.inputs.data_dir.join(stage.output_coordinates_file_name());
        telemetry::emit_stage_advanced(&stage, &output);
        self.context.advance(stage, output);
        self.next_stage()
    }

    /// Call one collaborator. Any failure moves the executor to `Failed`.
    async fn invoke(&mut self, step: Step, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        let stage = &invocation.stage;
        telemetry::emit_step_started(stage, step, &invocation.input_coordinates);

        let span = tracing::info_span!("mdchain.step", stage = %stage, step = step.name());
        let result = match step {
            Step::Prepare => self.tools.prepare(invocation).instrument(span).await,
            Step::Run => self.tools.run(invocation).instrument(span).await,
        };

        let error = match result {
            Ok(outcome) => {
                telemetry::emit_step_finished(stage, step, outcome.exit_code, outcome.duration_ms);
                if outcome.passed() {
                    return Ok(outcome);
                }
                ChainError::StageFailed {
                    stage: stage.to_string(),
                    step,
                    exit_code: outcome.exit_code,
                }
            }
            Err(err) => err,
        };

        telemetry::emit_chain_failed(stage, step, &error);
        self.pending = None;
        self.state = PipelineState::Failed {
            stage: stage.clone(),
            step,
            cause: FailureCause::from_error(&error),
        };
        Err(error)
    }
}
