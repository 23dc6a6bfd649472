//! Clearing of generated folders (logs, results, checkpoints).

use crate::error::{CarbonError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Entry that is never deleted.
const KEEP: &str = ".gitignore";

/// A group of generated folders that can be cleared together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTarget {
    Log,
    Tensorboard,
    Results,
    Saved,
    All,
}

impl CacheTarget {
    /// Folder names, relative to the workspace, covered by this target.
    pub fn folders(&self) -> &'static [&'static str] {
        match self {
            Self::Log => &["log"],
            Self::Tensorboard => &["log_tensorboard"],
            Self::Results => &["results", "results_shared"],
            Self::Saved => &["saved"],
            Self::All => &["log", "log_tensorboard", "results", "results_shared", "saved"],
        }
    }
}

/// Outcome of clearing one folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearReport {
    pub folder: PathBuf,
    pub removed: usize,
    pub failures: Vec<(PathBuf, String)>,
}

/// Delete everything inside `dir` except `.gitignore`.
///
/// Per-entry failures are logged and collected; the remaining entries are
/// still processed. Failing to list `dir` itself is an error.
pub fn clear_cache(dir: &Path) -> Result<ClearReport> {
    let mut report = ClearReport {
        folder: dir.to_path_buf(),
        ..Default::default()
    };
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(folder = %dir.display(), error = %e, "Failed to read directory entry");
                report.failures.push((dir.to_path_buf(), e.to_string()));
                continue;
            }
        };
        if entry.file_name() == KEEP {
            continue;
        }
        let path = entry.path();
        match remove_entry(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to delete");
                report.failures.push((path, e.to_string()));
            }
        }
    }
    info!(folder = %dir.display(), removed = report.removed, "Folder cleared");
    Ok(report)
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Reject `All` combined with any other target and drop duplicates.
pub fn resolve_targets(targets: &[CacheTarget]) -> Result<Vec<CacheTarget>> {
    if targets.contains(&CacheTarget::All) && targets.len() > 1 {
        return Err(CarbonError::CacheConflict(format!("{targets:?}")));
    }
    let mut unique = Vec::with_capacity(targets.len());
    for t in targets {
        if !unique.contains(t) {
            unique.push(*t);
        }
    }
    Ok(unique)
}

/// Clear every folder of every target under `workspace`.
///
/// Missing folders are skipped with a warning.
pub fn clear_targets(workspace: &Path, targets: &[CacheTarget]) -> Result<Vec<ClearReport>> {
    let targets = resolve_targets(targets)?;
    let mut reports = Vec::new();
    for target in targets {
        for folder in target.folders() {
            let dir = workspace.join(folder);
            if !dir.is_dir() {
                warn!(folder = %dir.display(), "Folder does not exist, skipping");
                continue;
            }
            reports.push(clear_cache(&dir)?);
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn populate(dir: &Path) {
        std::fs::create_dir_all(dir.join("ml-1m/BPR")).unwrap();
        std::fs::write(dir.join("ml-1m/BPR/metrics.csv"), "x\n1\n").unwrap();
        std::fs::write(dir.join("carbon_tuning.log"), "line\n").unwrap();
        std::fs::write(dir.join(".gitignore"), "*\n!.gitignore\n").unwrap();
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut out: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_clear_keeps_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());
        let report = clear_cache(dir.path()).unwrap();
        assert_eq!(report.removed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(names(dir.path()), vec![".gitignore"]);
    }

    #[test]
    fn test_clear_missing_folder_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(clear_cache(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_all_conflicts_with_others() {
        let err = resolve_targets(&[CacheTarget::All, CacheTarget::Log]).unwrap_err();
        assert!(matches!(err, CarbonError::CacheConflict(_)));
        assert_eq!(
            resolve_targets(&[CacheTarget::Log, CacheTarget::Log]).unwrap(),
            vec![CacheTarget::Log]
        );
    }

    #[test]
    fn test_results_target_covers_shared_folder() {
        let dir = tempfile::tempdir().unwrap();
        populate(&dir.path().join("results"));
        populate(&dir.path().join("results_shared"));
        populate(&dir.path().join("saved"));
        let reports = clear_targets(dir.path(), &[CacheTarget::Results]).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(names(&dir.path().join("results_shared")), vec![".gitignore"]);
        assert_eq!(names(&dir.path().join("saved")).len(), 3);
    }

    #[test]
    fn test_missing_target_folders_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        populate(&dir.path().join("log"));
        let reports = clear_targets(dir.path(), &[CacheTarget::All]).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].folder, dir.path().join("log"));
    }
}
