//! carbonrec CLI: run, tune and maintain recommender training experiments.

mod commands;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// carbonrec: energy-aware recommender experiment harness
#[derive(Parser, Debug)]
#[command(name = "carbonrec", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (results, logs and checkpoints live here)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Train with default parameters (every configured pair when none is given)
    Run {
        /// Dataset name
        #[arg(long, requires = "model")]
        dataset: Option<String>,
        /// Model name
        #[arg(long, requires = "dataset")]
        model: Option<String>,
    },
    /// Grid-search a model's hyperparameters on one dataset
    Tune {
        /// Dataset name
        #[arg(long)]
        dataset: String,
        /// Model name
        #[arg(long)]
        model: String,
    },
    /// Print the number of grid points of a `.hyper` file
    Count {
        /// Path to a `.hyper` file
        #[arg(required_unless_present = "model")]
        file: Option<PathBuf>,
        /// Use the configured grid file of this model
        #[arg(long, conflicts_with = "file")]
        model: Option<String>,
    },
    /// Delete generated folders (keeps .gitignore)
    #[command(group(
        ArgGroup::new("targets")
            .required(true)
            .multiple(true)
            .args(["log", "tb", "results", "saved", "all"])
    ))]
    Clear {
        /// Delete the log folder
        #[arg(long)]
        log: bool,
        /// Delete the log_tensorboard folder
        #[arg(long)]
        tb: bool,
        /// Delete the results and results_shared folders
        #[arg(long)]
        results: bool,
        /// Delete the saved (checkpoint) folder
        #[arg(long)]
        saved: bool,
        /// Delete all of the above
        #[arg(long, conflicts_with_all = ["log", "tb", "results", "saved"])]
        all: bool,
    },
    /// Print statistics of a dataset directory
    Stats {
        /// Dataset directory containing `<name>.inter`
        #[arg(required_unless_present = "dataset")]
        dir: Option<PathBuf>,
        /// Use the configured dataset directory of this dataset
        #[arg(long, conflicts_with = "dir")]
        dataset: Option<String>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default carbonrec.toml into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "carbonrec", "carbonrec")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "carbonrec.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = resolve_workspace(&cli.workspace)?;

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}

/// Canonical workspace path. A missing or non-directory path is an error so
/// that no command runs against some other tree.
fn resolve_workspace(path: &Path) -> anyhow::Result<PathBuf> {
    let workspace = path
        .canonicalize()
        .with_context(|| format!("workspace {} does not exist", path.display()))?;
    if !workspace.is_dir() {
        anyhow::bail!("workspace {} is not a directory", workspace.display());
    }
    Ok(workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_accepts_equals_flags() {
        let cli = Cli::try_parse_from(["carbonrec", "run", "--dataset=mind", "--model=BPR"]).unwrap();
        match cli.command {
            Commands::Run { dataset, model } => {
                assert_eq!(dataset.as_deref(), Some("mind"));
                assert_eq!(model.as_deref(), Some("BPR"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_both_flags() {
        assert!(Cli::try_parse_from(["carbonrec", "run", "--dataset=mind"]).is_err());
        assert!(Cli::try_parse_from(["carbonrec", "run"]).is_ok());
    }

    #[test]
    fn test_tune_requires_dataset_and_model() {
        assert!(Cli::try_parse_from(["carbonrec", "tune", "--model=BPR"]).is_err());
    }

    #[test]
    fn test_clear_flags() {
        assert!(Cli::try_parse_from(["carbonrec", "clear"]).is_err());
        assert!(Cli::try_parse_from(["carbonrec", "clear", "--all", "--log"]).is_err());
        assert!(Cli::try_parse_from(["carbonrec", "clear", "--log", "--tb"]).is_ok());
    }

    #[test]
    fn test_missing_workspace_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo");
        let err = resolve_workspace(&missing).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(resolve_workspace(&file).is_err());

        assert_eq!(
            resolve_workspace(dir.path()).unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_stats_needs_dir_or_dataset() {
        assert!(Cli::try_parse_from(["carbonrec", "stats"]).is_err());
        assert!(Cli::try_parse_from(["carbonrec", "stats", "data/mind"]).is_ok());
        assert!(Cli::try_parse_from(["carbonrec", "stats", "--dataset=mind"]).is_ok());
        assert!(Cli::try_parse_from(["carbonrec", "stats", "data/mind", "--dataset=mind"]).is_err());
    }

    #[test]
    fn test_count_needs_file_or_model() {
        assert!(Cli::try_parse_from(["carbonrec", "count"]).is_err());
        assert!(Cli::try_parse_from(["carbonrec", "count", "BPR.hyper"]).is_ok());
        assert!(Cli::try_parse_from(["carbonrec", "count", "--model=BPR"]).is_ok());
    }
}
