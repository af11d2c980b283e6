//! Stage list resolution: an explicit manifest or the data directory listing.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{ChainError, ChainResult};
use crate::stage::{StageId, PROCESSED_CONFIG_SUFFIX, STAGE_CONFIG_SUFFIX};

/// Where the stage order came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSource {
    /// One stage per line of this file, in file order.
    Manifest { path: PathBuf },

    /// Every `*.mdp` in the data directory, sorted by file name bytes.
    Directory { path: PathBuf },
}

/// Resolve the ordered stage list.
///
/// A relative manifest path is taken relative to `data_dir`.
pub fn resolve_stages(
    data_dir: &Path,
    manifest: Option<&Path>,
) -> ChainResult<(Vec<StageId>, StageSource)> {
    match manifest {
        Some(manifest) => {
            let path = data_dir.join(manifest);
            let stages = read_manifest(&path)?;
            Ok((stages, StageSource::Manifest { path }))
        }
        None => {
            let stages = list_stage_configs(data_dir)?;
            Ok((
                stages,
                StageSource::Directory {
                    path: data_dir.to_path_buf(),
                },
            ))
        }
    }
}

/// Read a manifest verbatim: file order, duplicates kept.
///
/// Only line terminators are removed and blank lines skipped; an entry may
/// be a bare id or a `.mdp` file name.
pub fn read_manifest(path: &Path) -> ChainResult<Vec<StageId>> {
    if !path.is_file() {
        return Err(ChainError::ConfigurationMissing {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path).map_err(|e| ChainError::io(path, e))?;

    let stages = content
        .lines()
        .filter(|line| !line.is_empty())
        .map(StageId::from_config_name)
        .collect::<ChainResult<Vec<_>>>()?;

    debug!(manifest = %path.display(), count = stages.len(), "Read stage manifest");
    Ok(stages)
}

/// List stage configuration files in `data_dir`, ordered lexicographically
/// by file name bytes. grompp's `*_mdout.mdp` echoes are not stages.
pub fn list_stage_configs(data_dir: &Path) -> ChainResult<Vec<StageId>> {
    let entries = std::fs::read_dir(data_dir).map_err(|e| ChainError::io(data_dir, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ChainError::io(data_dir, e))?;
        let file_type = entry.file_type().map_err(|e| ChainError::io(entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        // Non-UTF-8 names cannot be passed through as stage ids.
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(STAGE_CONFIG_SUFFIX) && !name.ends_with(PROCESSED_CONFIG_SUFFIX) {
            names.push(name);
        }
    }
    names.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    let stages = names
        .iter()
        .map(|name| StageId::from_config_name(name))
        .collect::<ChainResult<Vec<_>>>()?;

    debug!(dir = %data_dir.display(), count = stages.len(), "Listed stage configs");
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ids(stages: &[StageId]) -> Vec<&str> {
        stages.iter().map(StageId::as_str).collect()
    }

    #[test]
    fn test_directory_listing_is_lexicographic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["prod.mdp", "eq.mdp", "Min.mdp", "start.gro", "topol.top"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let (stages, source) = resolve_stages(dir.path(), None).unwrap();
        // Byte order puts upper case first.
        assert_eq!(ids(&stages), vec!["Min", "eq", "prod"]);
        assert!(matches!(source, StageSource::Directory { .. }));
    }

    #[test]
    fn test_directory_listing_skips_mdout_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("eq.mdp"), "").unwrap();
        fs::write(dir.path().join("eq_mdout.mdp"), "").unwrap();
        fs::create_dir(dir.path().join("old.mdp")).unwrap();

        let stages = list_stage_configs(dir.path()).unwrap();
        assert_eq!(ids(&stages), vec!["eq"]);
    }

    #[test]
    fn test_manifest_keeps_order_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stages.txt"), "prod\neq.mdp\r\n\nprod\n").unwrap();

        let (stages, source) =
            resolve_stages(dir.path(), Some(Path::new("stages.txt"))).unwrap();
        assert_eq!(ids(&stages), vec!["prod", "eq", "prod"]);
        assert_eq!(
            source,
            StageSource::Manifest {
                path: dir.path().join("stages.txt")
            }
        );
    }

    #[test]
    fn test_missing_manifest_is_configuration_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_stages(dir.path(), Some(Path::new("nope.txt"))).unwrap_err();
        assert!(matches!(err, ChainError::ConfigurationMissing { .. }));
    }

    #[test]
    fn test_absolute_manifest_path_used_as_is() {
        let data = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let manifest = elsewhere.path().join("order.txt");
        fs::write(&manifest, "nvt\n").unwrap();

        let (stages, _) = resolve_stages(data.path(), Some(&manifest)).unwrap();
        assert_eq!(ids(&stages), vec!["nvt"]);
    }

    #[test]
    fn test_empty_directory_yields_no_stages() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_stage_configs(dir.path()).unwrap().is_empty());
    }
}
