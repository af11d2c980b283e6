//! Execution-mode selection, decided once before any stage runs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChainError, ChainResult};

/// Environment variable a batch scheduler uses to publish the host list.
pub const DEFAULT_HOST_LIST_VAR: &str = "PBS_NODEFILE";

/// What the user asked for on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeRequest {
    /// Launch mdrun through the MPI launcher.
    pub mpi: bool,

    /// Substitute a tune_pme pass for the plain mdrun. Implies `mpi`.
    pub tune: bool,

    /// Explicit thread count for single-process runs.
    pub threads: Option<u32>,
}

/// Concrete form the run step takes for every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// `gmx mdrun`, optionally with `-nt`.
    Single { threads: Option<u32> },

    /// `mpirun -np N -hostfile F gmx_mpi mdrun`
    Mpi { host_file: PathBuf, ranks: usize },

    /// `gmx tune_pme -np N ... -launch`
    MpiTuned { host_file: PathBuf, ranks: usize },
}

impl ExecutionMode {
    /// Pick the execution mode.
    ///
    /// Conflicting flags are rejected before the environment is consulted.
    /// `env` looks up environment variables; the binary passes
    /// `std::env::var(..).ok()`.
    pub fn select<F>(request: ModeRequest, host_list_var: &str, env: F) -> ChainResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let multi_process = request.mpi || request.tune;

        if let Some(threads) = request.threads {
            if multi_process {
                return Err(ChainError::ConfigurationConflict(
                    "a thread count cannot be combined with MPI or tuning mode".to_string(),
                ));
            }
            if threads == 0 {
                return Err(ChainError::ConfigurationConflict(
                    "thread count must be at least 1".to_string(),
                ));
            }
        }

        if !multi_process {
            return Ok(ExecutionMode::Single {
                threads: request.threads,
            });
        }

        let host_file = match env(host_list_var) {
            Some(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
            _ => {
                return Err(ChainError::EnvironmentMissing {
                    variable: host_list_var.to_string(),
                    reason: "is not set".to_string(),
                })
            }
        };

        let ranks = count_hosts(&host_file).ok_or_else(|| ChainError::EnvironmentMissing {
            variable: host_list_var.to_string(),
            reason: format!("points at {} which is missing or empty", host_file.display()),
        })?;
        // mpirun runs from the data directory, not from here.
        let host_file = std::fs::canonicalize(&host_file).map_err(|e| ChainError::io(&host_file, e))?;

        debug!(host_file = %host_file.display(), ranks, tune = request.tune, "Selected MPI mode");

        if request.tune {
            Ok(ExecutionMode::MpiTuned { host_file, ranks })
        } else {
            Ok(ExecutionMode::Mpi { host_file, ranks })
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Single { .. } => "single",
            ExecutionMode::Mpi { .. } => "mpi",
            ExecutionMode::MpiTuned { .. } => "mpi_tuned",
        }
    }
}

/// One rank per non-blank host line, as PBS writes one line per slot.
fn count_hosts(host_file: &std::path::Path) -> Option<usize> {
    let content = std::fs::read_to_string(host_file).ok()?;
    let ranks = content.lines().filter(|l| !l.trim().is_empty()).count();
    (ranks > 0).then_some(ranks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_single_process() {
        let mode = ExecutionMode::select(ModeRequest::default(), DEFAULT_HOST_LIST_VAR, env_with(&[]))
            .unwrap();
        assert_eq!(mode, ExecutionMode::Single { threads: None });
    }

    #[test]
    fn test_threads_pass_through() {
        let request = ModeRequest {
            threads: Some(8),
            ..Default::default()
        };
        let mode = ExecutionMode::select(request, DEFAULT_HOST_LIST_VAR, env_with(&[])).unwrap();
        assert_eq!(mode, ExecutionMode::Single { threads: Some(8) });
    }

    #[test]
    fn test_threads_with_mpi_conflict() {
        let request = ModeRequest {
            mpi: true,
            threads: Some(4),
            ..Default::default()
        };
        let err = ExecutionMode::select(request, DEFAULT_HOST_LIST_VAR, env_with(&[])).unwrap_err();
        assert!(matches!(err, ChainError::ConfigurationConflict(_)));
    }

    #[test]
    fn test_threads_with_tune_conflict() {
        let request = ModeRequest {
            tune: true,
            threads: Some(4),
            ..Default::default()
        };
        let err = ExecutionMode::select(request, DEFAULT_HOST_LIST_VAR, env_with(&[])).unwrap_err();
        assert!(matches!(err, ChainError::ConfigurationConflict(_)));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let request = ModeRequest {
            threads: Some(0),
            ..Default::default()
        };
        assert!(ExecutionMode::select(request, DEFAULT_HOST_LIST_VAR, env_with(&[])).is_err());
    }

    #[test]
    fn test_mpi_without_host_list() {
        let request = ModeRequest {
            mpi: true,
            ..Default::default()
        };
        let err = ExecutionMode::select(request, DEFAULT_HOST_LIST_VAR, env_with(&[])).unwrap_err();
        match err {
            ChainError::EnvironmentMissing { variable, .. } => assert_eq!(variable, "PBS_NODEFILE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_mpi_with_missing_host_file() {
        let request = ModeRequest {
            mpi: true,
            ..Default::default()
        };
        let err = ExecutionMode::select(
            request,
            DEFAULT_HOST_LIST_VAR,
            env_with(&[("PBS_NODEFILE", "/definitely/not/here")]),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::EnvironmentMissing { .. }));
    }

    #[test]
    fn test_mpi_counts_ranks_from_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("nodes");
        std::fs::write(&hosts, "node01\nnode01\n\nnode02\n").unwrap();
        let hosts_str = hosts.to_string_lossy().to_string();

        let request = ModeRequest {
            mpi: true,
            ..Default::default()
        };
        let mode = ExecutionMode::select(
            request,
            "HOSTS",
            env_with(&[("HOSTS", hosts_str.as_str())]),
        )
        .unwrap();
        assert_eq!(
            mode,
            ExecutionMode::Mpi {
                host_file: hosts.canonicalize().unwrap(),
                ranks: 3
            }
        );
    }

    #[test]
    fn test_relative_host_file_is_made_absolute() {
        let dir = tempfile::Builder::new()
            .prefix("mdchain-hosts")
            .tempdir_in(".")
            .unwrap();
        std::fs::write(dir.path().join("nodes"), "node01\n").unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap()).join("nodes");
        let relative_str = relative.to_string_lossy().to_string();

        let request = ModeRequest {
            mpi: true,
            ..Default::default()
        };
        let mode = ExecutionMode::select(
            request,
            "HOSTS",
            env_with(&[("HOSTS", relative_str.as_str())]),
        )
        .unwrap();
        match mode {
            ExecutionMode::Mpi { host_file, ranks } => {
                assert!(host_file.is_absolute());
                assert_eq!(host_file, relative.canonicalize().unwrap());
                assert_eq!(ranks, 1);
            }
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[test]
    fn test_tune_implies_mpi() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("nodes");
        std::fs::write(&hosts, "node01\n").unwrap();
        let hosts_str = hosts.to_string_lossy().to_string();

        let request = ModeRequest {
            tune: true,
            ..Default::default()
        };
        let mode = ExecutionMode::select(
            request,
            DEFAULT_HOST_LIST_VAR,
            env_with(&[("PBS_NODEFILE", hosts_str.as_str())]),
        )
        .unwrap();
        assert_eq!(mode.name(), "mpi_tuned");
    }
}
