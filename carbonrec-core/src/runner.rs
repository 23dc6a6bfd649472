//! External trainer invocation.
//!
//! Training, evaluation and emissions measurement happen in an external
//! process. The harness sends a [`TrainRequest`] as JSON on stdin and expects a
//! [`TrainOutcome`] as JSON on stdout:
//!
//! ```json
//! {"run_id": "5b0c...", "metrics": {"recall@10": 0.21}, "params": {"epochs": 10}}
//! ```

use crate::config::TrainerConfig;
use crate::error::{CarbonError, Result};
use crate::results::ResultRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// One training job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub project_name: String,
    pub dataset: String,
    pub model: String,
    /// Full parameter set, grid overrides already applied.
    pub params: serde_json::Map<String, serde_json::Value>,
    /// Where the emissions tracker writes its CSV.
    pub emissions_file: PathBuf,
    /// Static parameter files the trainer should load first.
    #[serde(default)]
    pub config_files: Vec<PathBuf>,
}

/// What the trainer reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    /// Emissions tracker run id.
    pub run_id: String,
    /// Test metrics, in the trainer's order.
    pub metrics: ResultRecord,
    /// Final resolved parameters, in the trainer's order.
    #[serde(default)]
    pub params: ResultRecord,
    /// Best validation score seen while fitting, used to rank grid points.
    #[serde(default)]
    pub best_valid_score: Option<f64>,
    /// Whether a larger validation score is better (true for MRR, NDCG, ...).
    #[serde(default = "default_valid_score_bigger")]
    pub valid_score_bigger: bool,
}

fn default_valid_score_bigger() -> bool {
    true
}

/// Anything that can run a training job.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, request: &TrainRequest) -> Result<TrainOutcome>;
}

/// Trainer that runs an external command per job.
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
    workspace: PathBuf,
    timeout: Duration,
}

impl CommandTrainer {
    pub fn new(config: &TrainerConfig, workspace: PathBuf) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            workspace,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    async fn run(&self, input: Vec<u8>) -> Result<TrainOutcome> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.workspace)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CarbonError::trainer(format!("Failed to spawn {}: {e}", self.program)))?;

        // A trainer may exit without reading its input; the exit status decides.
        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(&input).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CarbonError::trainer(format!(
                "trainer failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_outcome(&stdout)
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn train(&self, request: &TrainRequest) -> Result<TrainOutcome> {
        let input = serde_json::to_vec(request)?;
        debug!(
            program = %self.program,
            project = %request.project_name,
            "Launching trainer"
        );

        match tokio::time::timeout(self.timeout, self.run(input)).await {
            Ok(inner) => inner,
            Err(_) => Err(CarbonError::Timeout(format!(
                "trainer for {} timed out after {}s",
                request.project_name,
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Parse the trainer's stdout. Only the last non-empty line is considered, so
/// framework progress output printed before it is ignored.
fn parse_outcome(stdout: &str) -> Result<TrainOutcome> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| CarbonError::trainer("trainer produced no output"))?;
    serde_json::from_str(line.trim())
        .map_err(|e| CarbonError::trainer(format!("invalid trainer output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> TrainRequest {
        TrainRequest {
            project_name: "TOY_POP_DEFAULT_PARAM_0".to_string(),
            dataset: "toy".to_string(),
            model: "Pop".to_string(),
            params: serde_json::Map::new(),
            emissions_file: PathBuf::from("results_shared/toy/Pop/emissions.csv"),
            config_files: Vec::new(),
        }
    }

    fn sh(script: &str, workspace: &std::path::Path) -> CommandTrainer {
        let config = TrainerConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            timeout_secs: 30,
        };
        CommandTrainer::new(&config, workspace.to_path_buf())
    }

    #[test]
    fn test_parse_outcome_uses_last_line() {
        let out = parse_outcome(
            "epoch 1 loss 0.5\n{\"run_id\":\"r1\",\"metrics\":{\"b\":1,\"a\":2}}\n\n",
        )
        .unwrap();
        assert_eq!(out.run_id, "r1");
        assert_eq!(out.metrics.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert!(out.params.is_empty());
        assert_eq!(out.best_valid_score, None);
        assert!(out.valid_score_bigger);
    }

    #[test]
    fn test_parse_outcome_rejects_garbage() {
        assert!(matches!(parse_outcome(""), Err(CarbonError::Trainer(_))));
        assert!(matches!(
            parse_outcome("not json"),
            Err(CarbonError::Trainer(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_trainer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = sh(
            "cat > request.json; echo '{\"run_id\":\"abc\",\"metrics\":{\"mrr@10\":0.3}}'",
            dir.path(),
        );
        let outcome = trainer.train(&request()).await.unwrap();
        assert_eq!(outcome.run_id, "abc");

        let sent: TrainRequest =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("request.json")).unwrap())
                .unwrap();
        assert_eq!(sent, request());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_trainer_failure() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = sh("echo 'CUDA out of memory' >&2; exit 3", dir.path());
        let err = trainer.train(&request()).await.unwrap_err();
        assert!(err.to_string().contains("CUDA out of memory"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_trainer_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = sh("sleep 5", dir.path()).with_timeout(Duration::from_millis(100));
        let err = trainer.train(&request()).await.unwrap_err();
        assert!(matches!(err, CarbonError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainerConfig {
            program: "carbonrec-no-such-trainer".to_string(),
            args: Vec::new(),
            timeout_secs: 5,
        };
        let trainer = CommandTrainer::new(&config, dir.path().to_path_buf());
        let err = trainer.train(&request()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
