//! Dataset statistics for atomic-file datasets (`.inter`, `.kg`, `.link`).

use crate::error::{CarbonError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Knowledge-aware models; every other model is treated as general.
const KNOWLEDGE_MODELS: &[&str] = &[
    "CKE", "CFKG", "KGAT", "KGCN", "KGIN", "KGNNLS", "KTUP", "MCCLK", "MKR", "RippleNet",
];

/// Model family, used to pick the trainer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    General,
    Knowledge,
}

/// Classify a model by name (case sensitive).
pub fn model_type(model: &str) -> ModelType {
    if KNOWLEDGE_MODELS.contains(&model) {
        ModelType::Knowledge
    } else {
        ModelType::General
    }
}

/// Summary statistics of one dataset. KG fields are zero for datasets without
/// a knowledge graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    pub n_users: usize,
    pub n_items: usize,
    pub n_inter: usize,
    pub sparsity: f64,
    pub kg_entities: usize,
    pub kg_relations: usize,
    pub kg_triples: usize,
    pub kg_items: usize,
}

/// Compute statistics for the dataset stored in `dir`.
///
/// Files are named after the directory: `dir/<name>.inter` is required,
/// `dir/<name>.kg` and `dir/<name>.link` are read when the `.kg` file exists.
pub fn dataset_statistics(dir: &Path) -> Result<DatasetStatistics> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CarbonError::dataset(format!("invalid dataset path {}", dir.display())))?;

    let inter_path = dir.join(format!("{name}.inter"));
    if !inter_path.is_file() {
        return Err(CarbonError::dataset(format!(
            "missing required file {}",
            format!("{name}.inter").to_uppercase()
        )));
    }

    let mut stats = DatasetStatistics::default();
    let mut users = HashSet::new();
    let mut items = HashSet::new();
    for_each_row(&inter_path, &["user_id:token", "item_id:token"], |row| {
        users.insert(row[0].to_string());
        items.insert(row[1].to_string());
        stats.n_inter += 1;
    })?;
    stats.n_users = users.len();
    stats.n_items = items.len();
    if stats.n_users > 0 && stats.n_items > 0 {
        stats.sparsity =
            1.0 - stats.n_inter as f64 / stats.n_users as f64 / stats.n_items as f64;
    }

    let kg_path = dir.join(format!("{name}.kg"));
    if kg_path.is_file() {
        let mut entities = HashSet::new();
        let mut relations = HashSet::new();
        for_each_row(
            &kg_path,
            &["head_id:token", "relation_id:token", "tail_id:token"],
            |row| {
                entities.insert(row[0].to_string());
                relations.insert(row[1].to_string());
                entities.insert(row[2].to_string());
                stats.kg_triples += 1;
            },
        )?;
        stats.kg_entities = entities.len();
        stats.kg_relations = relations.len();

        let mut linked = HashSet::new();
        for_each_row(&dir.join(format!("{name}.link")), &["item_id:token"], |row| {
            linked.insert(row[0].to_string());
        })?;
        stats.kg_items = linked.len();
    }

    Ok(stats)
}

/// Stream a tab-separated file, passing the requested columns of each row.
fn for_each_row<F>(path: &Path, columns: &[&str], mut f: F) -> Result<()>
where
    F: FnMut(&[&str]),
{
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let indices = columns
        .iter()
        .map(|c| {
            headers.iter().position(|h| h == *c).ok_or_else(|| {
                CarbonError::dataset(format!("{} has no column '{c}'", path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for record in reader.records() {
        let record = record?;
        let row: Vec<&str> = indices
            .iter()
            .map(|&i| record.get(i).unwrap_or_default())
            .collect();
        f(&row);
    }
    Ok(())
}
