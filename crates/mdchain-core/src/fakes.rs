//! In-memory collaborator fake (testing only)
//!
//! `RecordingTools` satisfies the `StageTools` contract without spawning
//! anything and remembers every call it received.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ChainError, ChainResult};
use crate::stage::{StageId, StageInvocation, Step};
use crate::tools::{StageTools, StepOutcome};

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub step: Step,
    pub stage: StageId,
    pub input_coordinates: PathBuf,
    pub output_coordinates: PathBuf,
}

/// Fake collaborator with configurable failure points.
#[derive(Debug, Default)]
pub struct RecordingTools {
    calls: Mutex<Vec<Call>>,
    fail_prepare: HashSet<String>,
    fail_run: HashSet<String>,
    fail_launch: HashSet<String>,
}

impl RecordingTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the prepare step of `stage` exit with code 1.
    pub fn fail_prepare_at(mut self, stage: &str) -> Self {
        self.fail_prepare.insert(stage.to_string());
        self
    }

    /// Make the run step of `stage` exit with code 1.
    pub fn fail_run_at(mut self, stage: &str) -> Self {
        self.fail_run.insert(stage.to_string());
        self
    }

    /// Make the prepare step of `stage` fail to start, as if `gmx` were missing.
    pub fn fail_launch_at(mut self, stage: &str) -> Self {
        self.fail_launch.insert(stage.to_string());
        self
    }

    /// Snapshot of every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// `(step, stage)` pairs in call order.
    pub fn steps(&self) -> Vec<(Step, String)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.step, c.stage.to_string()))
            .collect()
    }

    fn record(&self, step: Step, invocation: &StageInvocation, failing: &HashSet<String>) -> StepOutcome {
        self.calls.lock().unwrap().push(Call {
            step,
            stage: invocation.stage.clone(),
            input_coordinates: invocation.input_coordinates.clone(),
            output_coordinates: invocation.output_coordinates.clone(),
        });
        if failing.contains(invocation.stage.as_str()) {
            StepOutcome::failed(Some(1), 0)
        } else {
            StepOutcome::succeeded(0)
        }
    }
}

#[async_trait]
impl StageTools for RecordingTools {
    async fn prepare(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        let outcome = self.record(Step::Prepare, invocation, &self.fail_prepare);
        if self.fail_launch.contains(invocation.stage.as_str()) {
            return Err(ChainError::Launch {
                stage: invocation.stage.to_string(),
                step: Step::Prepare,
                program: "gmx".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(outcome)
    }

    async fn run(&self, invocation: &StageInvocation) -> ChainResult<StepOutcome> {
        Ok(self.record(Step::Run, invocation, &self.fail_run))
    }
}
