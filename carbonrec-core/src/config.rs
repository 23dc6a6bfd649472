//! Configuration for the harness.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `carbonrec.toml` -> explicit file -> environment (`CARBONREC_`).
//!
//! Configuration values are immutable once loaded; the `with_*` methods return
//! a modified copy instead of mutating shared state.

use crate::device::Device;
use crate::error::{CarbonError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Workspace-level configuration file name.
pub const CONFIG_FILE_NAME: &str = "carbonrec.toml";

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Datasets a run may target.
    #[serde(default = "default_datasets")]
    pub datasets: Vec<String>,
    /// Models a run may target.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Force a device instead of detecting one.
    #[serde(default)]
    pub device: Option<Device>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    /// Static parameters handed to every training run.
    #[serde(default)]
    pub params: TrainingParams,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            datasets: default_datasets(),
            models: default_models(),
            device: None,
            paths: PathsConfig::default(),
            trainer: TrainerConfig::default(),
            params: TrainingParams::default(),
        }
    }
}

impl HarnessConfig {
    pub fn with_datasets(self, datasets: Vec<String>) -> Self {
        Self { datasets, ..self }
    }

    pub fn with_models(self, models: Vec<String>) -> Self {
        Self { models, ..self }
    }

    pub fn with_device(self, device: Option<Device>) -> Self {
        Self { device, ..self }
    }

    pub fn with_paths(self, paths: PathsConfig) -> Self {
        Self { paths, ..self }
    }

    pub fn with_trainer(self, trainer: TrainerConfig) -> Self {
        Self { trainer, ..self }
    }

    pub fn with_params(self, params: TrainingParams) -> Self {
        Self { params, ..self }
    }

    /// Check that `dataset` and `model` are configured.
    pub fn validate_pair(&self, dataset: &str, model: &str) -> Result<()> {
        if !self.datasets.iter().any(|d| d == dataset) {
            return Err(CarbonError::invalid_input(format!(
                "invalid DATASET value '{dataset}'. Valid: {:?}",
                self.datasets
            )));
        }
        if !self.models.iter().any(|m| m == model) {
            return Err(CarbonError::invalid_input(format!(
                "invalid MODEL value '{model}'. Valid: {:?}",
                self.models
            )));
        }
        Ok(())
    }

    /// Every configured dataset/model pair, datasets outermost.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.datasets
            .iter()
            .flat_map(|d| self.models.iter().map(move |m| (d.clone(), m.clone())))
            .collect()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| CarbonError::config(e.to_string()))
    }
}

/// Paths used by the drivers, relative to the workspace unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Session log for grid tuning.
    #[serde(default = "default_tuning_log")]
    pub tuning_log: PathBuf,
    /// Session log for default-parameter runs.
    #[serde(default = "default_default_log")]
    pub default_log: PathBuf,
    /// Root of dataset directories, each holding `<name>/<name>.inter`.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    /// Results of tuning sessions.
    #[serde(default = "default_result_path")]
    pub result_path: PathBuf,
    /// Results of default-parameter runs.
    #[serde(default = "default_result_path_shared")]
    pub result_path_shared: PathBuf,
    /// Static parameter file written before a tuning session.
    #[serde(default = "default_static_config_file")]
    pub static_config_file: PathBuf,
    /// Directory holding `<model>.hyper` grid files.
    #[serde(default = "default_hp_config_path")]
    pub hp_config_path: PathBuf,
    #[serde(default = "default_emissions_file")]
    pub emissions_file: String,
    #[serde(default = "default_metrics_file")]
    pub metrics_file: String,
    #[serde(default = "default_params_file")]
    pub params_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            tuning_log: default_tuning_log(),
            default_log: default_default_log(),
            dataset_path: default_dataset_path(),
            result_path: default_result_path(),
            result_path_shared: default_result_path_shared(),
            static_config_file: default_static_config_file(),
            hp_config_path: default_hp_config_path(),
            emissions_file: default_emissions_file(),
            metrics_file: default_metrics_file(),
            params_file: default_params_file(),
        }
    }
}

impl PathsConfig {
    /// Grid file for `model`.
    pub fn hyper_file(&self, model: &str) -> PathBuf {
        self.hp_config_path.join(format!("{model}.hyper"))
    }
}

fn default_tuning_log() -> PathBuf {
    PathBuf::from("log/carbon_tuning.log")
}

fn default_default_log() -> PathBuf {
    PathBuf::from("log/carbon_default.log")
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("data")
}

fn default_result_path() -> PathBuf {
    PathBuf::from("results")
}

fn default_result_path_shared() -> PathBuf {
    PathBuf::from("results_shared")
}

fn default_static_config_file() -> PathBuf {
    PathBuf::from("config/_params.yaml")
}

fn default_hp_config_path() -> PathBuf {
    PathBuf::from("config/hyperparam")
}

fn default_emissions_file() -> String {
    "emissions.csv".to_string()
}

fn default_metrics_file() -> String {
    "metrics.csv".to_string()
}

fn default_params_file() -> String {
    "params.csv".to_string()
}

/// External trainer process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default = "default_trainer_program")]
    pub program: String,
    #[serde(default = "default_trainer_args")]
    pub args: Vec<String>,
    /// Maximum duration of a single training call (seconds).
    #[serde(default = "default_trainer_timeout")]
    pub timeout_secs: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: default_trainer_program(),
            args: default_trainer_args(),
            timeout_secs: default_trainer_timeout(),
        }
    }
}

fn default_trainer_program() -> String {
    "python3".to_string()
}

fn default_trainer_args() -> Vec<String> {
    vec!["-m".to_string(), "carbonrec_trainer".to_string()]
}

fn default_trainer_timeout() -> u64 {
    48 * 3600
}

/// Negative sampling used during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegSampleArgs {
    pub distribution: String,
    pub sample_num: u32,
    pub dynamic: bool,
    pub candidate_num: u32,
}

impl Default for NegSampleArgs {
    fn default() -> Self {
        Self {
            distribution: "uniform".to_string(),
            sample_num: 1,
            dynamic: false,
            candidate_num: 0,
        }
    }
}

/// Evaluation split and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalArgs {
    pub group_by: String,
    pub order: String,
    pub split: BTreeMap<String, Vec<f64>>,
    pub mode: String,
}

impl Default for EvalArgs {
    fn default() -> Self {
        Self {
            group_by: "user".to_string(),
            order: "RO".to_string(),
            split: BTreeMap::from([("RS".to_string(), vec![0.8, 0.1, 0.1])]),
            mode: "full".to_string(),
        }
    }
}

/// Parameters passed to the trainer. Field order is the order of the static
/// YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingParams {
    // Environment
    pub gpu_id: u32,
    pub worker: u32,
    pub use_gpu: bool,
    pub seed: u64,
    pub state: String,
    pub encoding: String,
    pub reproducibility: bool,
    pub data_path: String,
    pub checkpoint_dir: String,
    pub show_progress: bool,
    pub shuffle: bool,

    // Training
    pub epochs: u32,
    pub train_batch_size: u32,
    pub learner: String,
    pub learning_rate: f64,
    pub train_neg_sample_args: NegSampleArgs,
    pub eval_step: u32,
    pub stopping_step: u32,
    pub clip_grad_norm: Option<f64>,
    pub loss_decimal_place: u32,
    pub weight_decay: f64,
    pub require_pow: bool,
    pub enable_amp: bool,
    pub enable_scaler: bool,

    // Evaluation
    pub eval_args: EvalArgs,
    pub repeatable: bool,
    pub metrics: Vec<String>,
    pub topk: u32,
    pub valid_metric: String,
    pub eval_batch_size: u32,
    pub metric_decimal_place: u32,

    // Per run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_log_file: Option<String>,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            gpu_id: 0,
            worker: 0,
            use_gpu: true,
            seed: 42,
            state: "INFO".to_string(),
            encoding: "utf-8".to_string(),
            reproducibility: true,
            data_path: "data/".to_string(),
            checkpoint_dir: "saved/".to_string(),
            show_progress: true,
            shuffle: true,
            epochs: 10,
            train_batch_size: 2048,
            learner: "adam".to_string(),
            learning_rate: 0.001,
            train_neg_sample_args: NegSampleArgs::default(),
            eval_step: 1,
            stopping_step: 10,
            clip_grad_norm: None,
            loss_decimal_place: 4,
            weight_decay: 0.0,
            require_pow: false,
            enable_amp: false,
            enable_scaler: false,
            eval_args: EvalArgs::default(),
            repeatable: false,
            metrics: [
                "Recall",
                "MRR",
                "NDCG",
                "Hit",
                "MAP",
                "Precision",
                "GAUC",
                "ItemCoverage",
                "AveragePopularity",
                "GiniIndex",
                "ShannonEntropy",
                "TailPercentage",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            topk: 10,
            valid_metric: "MRR@10".to_string(),
            eval_batch_size: 4096,
            metric_decimal_place: 4,
            dataset: None,
            model: None,
            device: None,
            my_log_file: None,
        }
    }
}

impl TrainingParams {
    pub fn with_dataset(self, dataset: &str) -> Self {
        Self {
            dataset: Some(dataset.to_string()),
            ..self
        }
    }

    pub fn with_model(self, model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..self
        }
    }

    pub fn with_checkpoint_dir(self, checkpoint_dir: &Path) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.to_string_lossy().into_owned(),
            ..self
        }
    }

    pub fn with_device(self, device: Device) -> Self {
        Self {
            device: Some(device),
            ..self
        }
    }

    pub fn with_log_file(self, log_file: &Path) -> Self {
        Self {
            my_log_file: Some(log_file.to_string_lossy().into_owned()),
            ..self
        }
    }

    /// Parameters as a JSON object.
    pub fn to_json(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(CarbonError::config(format!(
                "training params did not serialize to an object: {other}"
            ))),
        }
    }

    /// Write the parameters as YAML, creating the parent directory.
    pub fn write_yaml(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

fn default_datasets() -> Vec<String> {
    let base = ["amazon_books_60core_kg", "mind", "movielens", "movielens_1m"];
    let mut datasets: Vec<String> = base.iter().map(|s| s.to_string()).collect();
    for name in base {
        for split in [2, 4, 6, 8, 10] {
            datasets.push(format!("{name}_split_{split}"));
        }
    }
    datasets
}

fn default_models() -> Vec<String> {
    [
        // General recommendation
        "ItemKNN",
        "Pop",
        "Random",
        "SimpleX",
        // Matrix factorization & linear
        "ADMMSLIM",
        "BPR",
        "DMF",
        "ENMF",
        "FISM",
        "NCEPLRec",
        "SLIMElastic",
        // Deep learning
        "CDAE",
        "ConvNCF",
        "DiffRec",
        "EASE",
        "GCMC",
        "LDiffRec",
        "MacridVAE",
        "MultiDAE",
        "MultiVAE",
        "NAIS",
        "NeuMF",
        "NGCF",
        "NNCF",
        "LightGCN",
        "RaCT",
        "RecVAE",
        // Graph-based
        "DGCF",
        "LINE",
        "NCL",
        "SGL",
        "SpectralCF",
        // Knowledge-aware
        "CKE",
        "CFKG",
        "KGAT",
        "KGCN",
        "KGIN",
        "KGNNLS",
        "KTUP",
        "MCCLK",
        "MKR",
        "RippleNet",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `CARBONREC_`, nested with `__`)
/// 2. Explicit config file (`--config`)
/// 3. Workspace config (`carbonrec.toml`)
/// 4. User config (`~/.config/carbonrec/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> std::result::Result<HarnessConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(HarnessConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "carbonrec", "carbonrec") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(CONFIG_FILE_NAME);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    // CARBONREC_TRAINER__PROGRAM, CARBONREC_PARAMS__EPOCHS, ...
    figment = figment.merge(Env::prefixed("CARBONREC_").split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.datasets.len(), 24);
        assert!(config.datasets.contains(&"movielens_1m_split_10".to_string()));
        assert_eq!(config.models.len(), 42);
        assert_eq!(config.params.seed, 42);
        assert_eq!(config.params.valid_metric, "MRR@10");
        assert_eq!(
            config.paths.hyper_file("BPR"),
            PathBuf::from("config/hyperparam/BPR.hyper")
        );
    }

    #[test]
    fn test_setters_return_new_instances() {
        let base = TrainingParams::default();
        let derived = base
            .clone()
            .with_dataset("mind")
            .with_model("BPR")
            .with_device(Device::Cpu)
            .with_checkpoint_dir(Path::new("saved/mind/BPR"));
        assert_eq!(base.dataset, None);
        assert_eq!(base.checkpoint_dir, "saved/");
        assert_eq!(derived.dataset.as_deref(), Some("mind"));
        assert_eq!(derived.checkpoint_dir, "saved/mind/BPR");
    }

    #[test]
    fn test_validate_pair() {
        let config = HarnessConfig::default();
        assert!(config.validate_pair("mind", "BPR").is_ok());
        let err = config.validate_pair("netflix", "BPR").unwrap_err();
        assert!(err.to_string().contains("invalid DATASET value"));
        let err = config.validate_pair("mind", "Word2Vec").unwrap_err();
        assert!(err.to_string().contains("invalid MODEL value"));
    }

    #[test]
    fn test_pairs_order() {
        let config = HarnessConfig::default()
            .with_datasets(vec!["d1".into(), "d2".into()])
            .with_models(vec!["m1".into(), "m2".into()]);
        assert_eq!(
            config.pairs(),
            vec![
                ("d1".to_string(), "m1".to_string()),
                ("d1".to_string(), "m2".to_string()),
                ("d2".to_string(), "m1".to_string()),
                ("d2".to_string(), "m2".to_string()),
            ]
        );
    }

    #[test]
    fn test_params_yaml_keeps_field_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/_params.yaml");
        TrainingParams::default()
            .with_model("BPR")
            .write_yaml(&path)
            .unwrap();
        let yaml = std::fs::read_to_string(&path).unwrap();
        assert!(yaml.starts_with("gpu_id: 0\n"));
        assert!(yaml.find("epochs").unwrap() < yaml.find("eval_args").unwrap());
        assert!(yaml.contains("model: BPR"));
        assert!(!yaml.contains("dataset:"));
    }

    #[test]
    fn test_params_json_keeps_field_order() {
        let json = TrainingParams::default().with_model("BPR").to_json().unwrap();
        let keys: Vec<&str> = json.keys().map(String::as_str).take(4).collect();
        assert_eq!(keys, vec!["gpu_id", "worker", "use_gpu", "seed"]);
        assert_eq!(json.keys().last().map(String::as_str), Some("model"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HarnessConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed: HarnessConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_config_merges_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "datasets = [\"toy\"]\n\n[params]\nepochs = 3\n\n[trainer]\nprogram = \"./train.sh\"\n",
        )
        .unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.datasets, vec!["toy".to_string()]);
        assert_eq!(config.params.epochs, 3);
        assert_eq!(config.params.learner, "adam");
        assert_eq!(config.trainer.program, "./train.sh");
        assert_eq!(config.models.len(), 42);
    }
}
