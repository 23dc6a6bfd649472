//! Experiment drivers.
//!
//! Two kinds of session are supported, both processed one dataset/model pair
//! at a time:
//!
//! - **default**: one training run with the static parameters, results under
//!   `results_shared/<dataset>/<model>/`;
//! - **tuning**: one run per point of `<model>.hyper`, results under
//!   `results/<dataset>/<model>/`.
//!
//! A failing trainer call ends its own session only. The failure is written to
//! the session log and the driver moves on.

use crate::config::{HarnessConfig, TrainingParams};
use crate::device::Device;
use crate::error::Result;
use crate::folders::{create_folders, pair_dir};
use crate::grid::{GridPoint, parse_grid};
use crate::results::{ResultLog, ResultRecord};
use crate::runner::{TrainOutcome, TrainRequest, Trainer};
use crate::session_log::SessionLog;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Final state of one dataset/model session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Completed,
    Failed,
}

/// Summary of one dataset/model session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub dataset: String,
    pub model: String,
    pub project_name: String,
    pub status: SessionStatus,
    /// Trainer runs whose results were written.
    pub runs: u64,
    /// Run with the best validation score, when the trainer reported one.
    #[serde(default)]
    pub best_run_id: Option<String>,
    #[serde(default)]
    pub best_valid_score: Option<f64>,
    pub error: Option<String>,
}

/// Runs written by one session and the best of them.
#[derive(Debug, Default)]
struct SessionSummary {
    runs: u64,
    best: Option<(String, f64)>,
}

impl SessionSummary {
    fn record(&mut self, run_id: &str, score: Option<f64>, bigger_is_better: bool) {
        self.runs += 1;
        let Some(score) = score else { return };
        let improves = match &self.best {
            None => true,
            Some((_, best)) if bigger_is_better => score > *best,
            Some((_, best)) => score < *best,
        };
        if improves {
            self.best = Some((run_id.to_string(), score));
        }
    }
}

/// Session kind, used for project naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Default,
    Tuning,
}

impl SessionKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT_PARAM",
            Self::Tuning => "PARAMS_TUNING",
        }
    }
}

/// `<DATASET>_<MODEL>_<TAG>_<ts>`.
pub fn project_name(kind: SessionKind, dataset: &str, model: &str, ts: i64) -> String {
    format!(
        "{}_{}_{}_{}",
        dataset.to_uppercase(),
        model.to_uppercase(),
        kind.tag(),
        ts
    )
}

/// Pick the configured device, or detect one.
pub async fn resolve_device(config: &HarnessConfig) -> Device {
    match config.device {
        Some(device) => device,
        None => Device::detect().await,
    }
}

/// Runs sessions against a [`Trainer`].
pub struct Harness {
    config: HarnessConfig,
    workspace: PathBuf,
    trainer: Box<dyn Trainer>,
    device: Device,
    session_ts: i64,
    results: ResultLog,
}

impl Harness {
    pub fn new(
        config: HarnessConfig,
        workspace: PathBuf,
        trainer: Box<dyn Trainer>,
        device: Device,
    ) -> Self {
        Self {
            config,
            workspace,
            trainer,
            device,
            session_ts: Utc::now().timestamp(),
            results: ResultLog::new(),
        }
    }

    /// Override the timestamp used in project names.
    pub fn with_session_ts(self, session_ts: i64) -> Self {
        Self { session_ts, ..self }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.workspace.join(path)
    }

    fn checkpoint_root(&self) -> PathBuf {
        self.workspace.join(&self.config.params.checkpoint_dir)
    }

    fn run_params(&self, dataset: &str, model: &str) -> TrainingParams {
        let checkpoint_dir = pair_dir(Path::new(&self.config.params.checkpoint_dir), dataset, model);
        self.config
            .params
            .clone()
            .with_checkpoint_dir(&checkpoint_dir)
            .with_dataset(dataset)
            .with_model(model)
            .with_device(self.device)
    }

    /// Run every configured dataset/model pair with default parameters.
    pub async fn run_all_default(&mut self) -> Result<Vec<PairOutcome>> {
        let pairs = self.config.pairs();
        info!(pairs = pairs.len(), "Starting default-parameter sweep");
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (dataset, model) in pairs {
            outcomes.push(self.run_default(&dataset, &model).await?);
        }
        Ok(outcomes)
    }

    /// One training run of `model` on `dataset` with the static parameters.
    pub async fn run_default(&mut self, dataset: &str, model: &str) -> Result<PairOutcome> {
        self.config.validate_pair(dataset, model)?;
        let results_root = self.resolve(&self.config.paths.result_path_shared);
        create_folders(&[dataset], &[model], &[&results_root, &self.checkpoint_root()])?;

        let log = SessionLog::open(self.resolve(&self.config.paths.default_log))?;
        let project = project_name(SessionKind::Default, dataset, model, self.session_ts);
        log.session_started(&project)?;

        let results_dir = pair_dir(&results_root, dataset, model);
        let result = self
            .default_session(&log, &project, dataset, model, &results_dir)
            .await;
        self.finish(&log, dataset, model, project, result)
    }

    async fn default_session(
        &mut self,
        log: &SessionLog,
        project: &str,
        dataset: &str,
        model: &str,
        results_dir: &Path,
    ) -> Result<SessionSummary> {
        let params = self.run_params(dataset, model).with_log_file(log.path());
        let request = TrainRequest {
            project_name: project.to_string(),
            dataset: dataset.to_string(),
            model: model.to_string(),
            params: params.to_json()?,
            emissions_file: results_dir.join(&self.config.paths.emissions_file),
            config_files: Vec::new(),
        };
        let outcome = self.trainer.train(&request).await?;
        log.session_ended(project)?;
        let mut summary = SessionSummary::default();
        summary.record(
            &outcome.run_id,
            outcome.best_valid_score,
            outcome.valid_score_bigger,
        );
        self.write_results(results_dir, &request, outcome, project)?;
        Ok(summary)
    }

    /// Grid-search `model` on `dataset` over every point of `<model>.hyper`.
    pub async fn run_tuning(&mut self, dataset: &str, model: &str) -> Result<PairOutcome> {
        self.config.validate_pair(dataset, model)?;
        let results_root = self.resolve(&self.config.paths.result_path);
        create_folders(&[dataset], &[model], &[&results_root, &self.checkpoint_root()])?;

        let log = SessionLog::open(self.resolve(&self.config.paths.tuning_log))?;
        let project = project_name(SessionKind::Tuning, dataset, model, self.session_ts);
        log.session_started(&project)?;

        let results_dir = pair_dir(&results_root, dataset, model);
        let static_file = self.resolve(&self.config.paths.static_config_file);
        let result = self
            .tuning_session(&log, &project, dataset, model, &results_dir, &static_file)
            .await;

        if static_file.is_file() {
            if let Err(e) = std::fs::remove_file(&static_file) {
                warn!(path = %static_file.display(), error = %e, "Failed to remove static config");
            }
        }
        self.finish(&log, dataset, model, project, result)
    }

    async fn tuning_session(
        &mut self,
        log: &SessionLog,
        project: &str,
        dataset: &str,
        model: &str,
        results_dir: &Path,
        static_file: &Path,
    ) -> Result<SessionSummary> {
        let params = self.run_params(dataset, model);
        params.write_yaml(static_file)?;

        let grid = parse_grid(&self.resolve(&self.config.paths.hyper_file(model)))?;
        let total = grid.size()?;
        info!(project, total, "Grid loaded");

        let base = params.to_json()?;
        // `summary.runs` is the progress counter, restarted for every session.
        let mut summary = SessionSummary::default();
        for point in grid.points() {
            let request = TrainRequest {
                project_name: project.to_string(),
                dataset: dataset.to_string(),
                model: model.to_string(),
                params: overlay(&base, &point),
                emissions_file: results_dir.join(&self.config.paths.emissions_file),
                config_files: vec![static_file.to_path_buf()],
            };
            let outcome = self.trainer.train(&request).await?;
            let (run_id, score, bigger) = (
                outcome.run_id.clone(),
                outcome.best_valid_score,
                outcome.valid_score_bigger,
            );
            self.write_results(results_dir, &request, outcome, project)?;
            summary.record(&run_id, score, bigger);
            log.run_progress(project, summary.runs, total)?;
        }

        if let Some((run_id, score)) = &summary.best {
            info!(project, run_id = %run_id, score, "Best grid point");
        }
        log.session_ended(project)?;
        Ok(summary)
    }

    fn write_results(
        &mut self,
        results_dir: &Path,
        request: &TrainRequest,
        outcome: TrainOutcome,
        project: &str,
    ) -> Result<()> {
        let TrainOutcome {
            run_id,
            metrics,
            params,
            ..
        } = outcome;
        let params = if params.is_empty() {
            ResultRecord::from_json_object(&request.params)
        } else {
            params
        };
        let paths = &self.config.paths;
        self.results.append(
            &results_dir.join(&paths.metrics_file),
            &metrics.with_run(&run_id, project),
        )?;
        self.results.append(
            &results_dir.join(&paths.params_file),
            &params.with_run(&run_id, project),
        )?;
        Ok(())
    }

    /// Turn a session result into an outcome, logging failures.
    fn finish(
        &self,
        log: &SessionLog,
        dataset: &str,
        model: &str,
        project: String,
        result: Result<SessionSummary>,
    ) -> Result<PairOutcome> {
        let (status, summary, error) = match result {
            Ok(summary) => (SessionStatus::Completed, summary, None),
            Err(e) => {
                log.session_failed(&project, &e)?;
                (SessionStatus::Failed, SessionSummary::default(), Some(e.to_string()))
            }
        };
        let (best_run_id, best_valid_score) = summary.best.unzip();
        Ok(PairOutcome {
            dataset: dataset.to_string(),
            model: model.to_string(),
            project_name: project,
            status,
            runs: summary.runs,
            best_run_id,
            best_valid_score,
            error,
        })
    }
}

/// Base parameters with the grid point's values laid over them.
fn overlay(
    base: &serde_json::Map<String, serde_json::Value>,
    point: &GridPoint,
) -> serde_json::Map<String, serde_json::Value> {
    let mut params = base.clone();
    for (name, value) in point.iter() {
        params.insert(name.to_string(), value.clone());
    }
    params
}
