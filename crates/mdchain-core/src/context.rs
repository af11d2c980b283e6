//! Prerequisite validation and the mutable coordinate state threaded
//! through the chain.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{ChainError, ChainResult};
use crate::stage::StageId;

/// Topology file name used when none is given.
pub const DEFAULT_TOPOLOGY: &str = "topol.top";

/// Validated, immutable inputs shared by every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainInputs {
    pub data_dir: PathBuf,
    pub initial_coordinates: PathBuf,
    pub topology: PathBuf,
}

impl ChainInputs {
    /// Check that the data directory, initial coordinates and topology all
    /// exist. File paths are resolved relative to `data_dir`, which is made
    /// absolute here: collaborators run with it as their working directory,
    /// so every path handed to them must not depend on the caller's.
    pub fn validate(
        data_dir: &Path,
        initial_coordinates: &Path,
        topology: Option<&Path>,
    ) -> ChainResult<Self> {
        if !data_dir.is_dir() {
            return Err(ChainError::PrerequisiteMissing {
                what: "data directory",
                path: data_dir.to_path_buf(),
            });
        }

        let data_dir = std::fs::canonicalize(data_dir).map_err(|e| ChainError::io(data_dir, e))?;

        let initial_coordinates = data_dir.join(initial_coordinates);
        if !initial_coordinates.exists() {
            return Err(ChainError::PrerequisiteMissing {
                what: "initial coordinate file",
                path: initial_coordinates,
            });
        }

        let topology = data_dir.join(topology.unwrap_or(Path::new(DEFAULT_TOPOLOGY)));
        if !topology.exists() {
            return Err(ChainError::PrerequisiteMissing {
                what: "topology file",
                path: topology,
            });
        }

        Ok(Self {
            data_dir,
            initial_coordinates,
            topology,
        })
    }
}

/// State carried from one stage to the next. Only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    previous_stage: Option<StageId>,
    current_coordinates: PathBuf,
}

impl RunContext {
    pub fn new(initial_coordinates: PathBuf) -> Self {
        Self {
            previous_stage: None,
            current_coordinates: initial_coordinates,
        }
    }

    pub fn previous_stage(&self) -> Option<&StageId> {
        self.previous_stage.as_ref()
    }

    pub fn current_coordinates(&self) -> &Path {
        &self.current_coordinates
    }

    /// Record `stage` as completed; its output becomes the next input.
    pub fn advance(&mut self, stage: StageId, output_coordinates: PathBuf) {
        self.previous_stage = Some(stage);
        self.current_coordinates = output_coordinates;
    }
}
