//! Chain configuration and planning.
//!
//! Everything that can fail before a collaborator is launched happens in
//! [`ChainConfig::plan`]: mode selection, prerequisite checks and stage
//! resolution, in that order.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::ChainInputs;
use crate::error::ChainResult;
use crate::mode::{ExecutionMode, ModeRequest, DEFAULT_HOST_LIST_VAR};
use crate::pipeline::{ChainExecutor, ChainReport};
use crate::resolver::{resolve_stages, StageSource};
use crate::stage::StageId;
use crate::telemetry;
use crate::tools::{DryRunTools, GromacsTools, StageTools, ToolConfig};

/// Immutable chain configuration, built once from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub data_dir: PathBuf,

    /// Relative to `data_dir` unless absolute.
    pub initial_coordinates: PathBuf,

    /// Defaults to `topol.top` in `data_dir`.
    pub topology: Option<PathBuf>,

    /// Explicit stage order; otherwise the directory listing is used.
    pub manifest: Option<PathBuf>,

    pub mode: ModeRequest,

    /// Environment variable naming the MPI host file.
    pub host_list_var: String,

    /// grompp `-maxwarn`.
    pub max_warnings: Option<u32>,

    pub tools: ToolConfig,
}

impl ChainConfig {
    pub fn new(data_dir: impl Into<PathBuf>, initial_coordinates: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            initial_coordinates: initial_coordinates.into(),
            topology: None,
            manifest: None,
            mode: ModeRequest::default(),
            host_list_var: DEFAULT_HOST_LIST_VAR.to_string(),
            max_warnings: None,
            tools: ToolConfig::default(),
        }
    }

    /// Validate everything and resolve the stage list.
    ///
    /// `env` looks up environment variables (the host list).
    pub fn plan<F>(&self, env: F) -> ChainResult<ChainPlan>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = ExecutionMode::select(self.mode, &self.host_list_var, env)?;
        let inputs = ChainInputs::validate(
            &self.data_dir,
            &self.initial_coordinates,
            self.topology.as_deref(),
        )?;
        let (stages, source) = resolve_stages(&inputs.data_dir, self.manifest.as_deref())?;
        let digest = compute_stages_digest(&stages);

        let source_name = match &source {
            StageSource::Manifest { .. } => "manifest",
            StageSource::Directory { .. } => "directory",
        };
        telemetry::emit_chain_planned(stages.len(), source_name, mode.name());

        Ok(ChainPlan {
            inputs,
            mode,
            stages,
            source,
            digest,
            max_warnings: self.max_warnings,
            tools: self.tools.clone(),
        })
    }
}

/// A validated chain, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainPlan {
    pub inputs: ChainInputs,
    pub mode: ExecutionMode,
    pub stages: Vec<StageId>,
    pub source: StageSource,

    /// SHA-256 of the ordered stage ids.
    pub digest: String,

    pub max_warnings: Option<u32>,
    pub tools: ToolConfig,
}

impl ChainPlan {
    /// Collaborator for this plan: the real binaries, or printed commands.
    pub fn tools(&self, dry_run: bool) -> Arc<dyn StageTools> {
        if dry_run {
            Arc::new(DryRunTools::new(self.tools.clone(), self.mode.clone()))
        } else {
            Arc::new(GromacsTools::new(self.tools.clone(), self.mode.clone()))
        }
    }

    pub fn executor(&self, tools: Arc<dyn StageTools>) -> ChainExecutor {
        ChainExecutor::new(
            tools,
            self.inputs.clone(),
            self.stages.clone(),
            self.max_warnings,
        )
    }

    /// Run the whole chain with the given collaborator.
    pub async fn execute(&self, tools: Arc<dyn StageTools>) -> ChainResult<ChainReport> {
        use tracing::Instrument;

        let span = telemetry::chain_span(&self.digest);
        let mut executor = self.executor(tools);
        executor.run().instrument(span).await
    }
}

/// Compute deterministic digest of ordered stage ids.
fn compute_stages_digest(stages: &[StageId]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_str().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
