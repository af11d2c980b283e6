//! Stage identity and per-stage invocation records.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};

/// File suffix of stage configuration files.
pub const STAGE_CONFIG_SUFFIX: &str = ".mdp";

/// Suffix grompp's processed-parameter echo is written with.
pub const PROCESSED_CONFIG_SUFFIX: &str = "_mdout.mdp";

/// Name of one pipeline step, derived from its configuration file name.
///
/// Every artifact a stage produces is namespaced by this id, so it must be
/// usable as a bare file name inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Create a stage id, rejecting names that cannot prefix a file name.
    pub fn new(name: impl Into<String>) -> ChainResult<Self> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(ChainError::InvalidStage(name));
        }
        Ok(StageId(name))
    }

    /// Accept either a bare id (`eq`) or a configuration file name (`eq.mdp`).
    pub fn from_config_name(name: &str) -> ChainResult<Self> {
        Self::new(name.strip_suffix(STAGE_CONFIG_SUFFIX).unwrap_or(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<id>.mdp`
    pub fn config_file_name(&self) -> String {
        format!("{}{}", self.0, STAGE_CONFIG_SUFFIX)
    }

    /// `<id>.tpr`, the run input grompp writes for mdrun.
    pub fn run_input_file_name(&self) -> String {
        format!("{}.tpr", self.0)
    }

    /// `<id>_mdout.mdp`
    pub fn processed_config_file_name(&self) -> String {
        format!("{}{}", self.0, PROCESSED_CONFIG_SUFFIX)
    }

    /// `after_<id>.gro`; the next stage locates its input by this name.
    pub fn output_coordinates_file_name(&self) -> String {
        format!("after_{}.gro", self.0)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two external steps every stage runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// gmx grompp
    Prepare,

    /// mdrun, or tune_pme in tuned mode; the program depends on the mode.
    Run,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Prepare => "prepare",
            Step::Run => "run",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything one stage's collaborators need. Built fresh for each stage
/// and dropped once the stage has advanced or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageInvocation {
    pub stage: StageId,

    /// Directory every artifact lives in; collaborators run from here.
    pub data_dir: PathBuf,

    /// `<id>.mdp`
    pub stage_config: PathBuf,

    /// Coordinates produced by the previous stage (or the initial file).
    pub input_coordinates: PathBuf,

    pub topology: PathBuf,

    /// `<id>.tpr`
    pub run_input: PathBuf,

    /// `<id>_mdout.mdp`
    pub processed_config: PathBuf,

    /// `after_<id>.gro`
    pub output_coordinates: PathBuf,

    /// Forwarded to grompp as `-maxwarn`.
    pub max_warnings: Option<u32>,
}

impl StageInvocation {
    pub fn new(
        data_dir: &Path,
        stage: StageId,
        input_coordinates: PathBuf,
        topology: PathBuf,
        max_warnings: Option<u32>,
    ) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            stage_config: data_dir.join(stage.config_file_name()),
            run_input: data_dir.join(stage.run_input_file_name()),
            processed_config: data_dir.join(stage.processed_config_file_name()),
            output_coordinates: data_dir.join(stage.output_coordinates_file_name()),
            input_coordinates,
            topology,
            max_warnings,
            stage,
        }
    }
}
