//! Result/checkpoint folder layout: `root/dataset/model`.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Ensure every `root/dataset/model` directory exists.
///
/// Existing directories are left untouched. Returns the leaf directories in
/// root, dataset, model order.
pub fn create_folders<D, M, R>(datasets: &[D], models: &[M], roots: &[R]) -> Result<Vec<PathBuf>>
where
    D: AsRef<str>,
    M: AsRef<str>,
    R: AsRef<Path>,
{
    let mut created = Vec::with_capacity(roots.len() * datasets.len() * models.len());
    for root in roots {
        for dataset in datasets {
            let base = root.as_ref().join(dataset.as_ref());
            for model in models {
                let leaf = base.join(model.as_ref());
                if !leaf.is_dir() {
                    std::fs::create_dir_all(&leaf)?;
                    debug!(path = %leaf.display(), "Created folder");
                }
                created.push(leaf);
            }
        }
    }
    Ok(created)
}

/// Leaf directory for one dataset/model pair under `root`.
pub fn pair_dir(root: &Path, dataset: &str, model: &str) -> PathBuf {
    root.join(dataset).join(model)
}
