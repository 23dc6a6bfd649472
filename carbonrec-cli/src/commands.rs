//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use anyhow::Context;
use carbonrec_core::cache::{CacheTarget, clear_targets};
use carbonrec_core::config::CONFIG_FILE_NAME;
use carbonrec_core::dataset::{ModelType, dataset_statistics, model_type};
use carbonrec_core::driver::resolve_device;
use carbonrec_core::{
    CommandTrainer, Harness, HarnessConfig, PairOutcome, SessionStatus, load_config,
    total_iterations,
};
use std::path::Path;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_path),
        Commands::Clear {
            log,
            tb,
            results,
            saved,
            all,
        } => handle_clear(workspace, clear_flags(log, tb, results, saved, all)),
        Commands::Stats { dir, dataset } => {
            let dir = match (dir, dataset) {
                (Some(dir), _) => dir,
                (None, Some(dataset)) => {
                    let config = load(workspace, config_path)?;
                    workspace.join(&config.paths.dataset_path).join(dataset)
                }
                (None, None) => anyhow::bail!("either a dataset directory or --dataset is required"),
            };
            handle_stats(&dir)
        }
        Commands::Count { file, model } => {
            let path = match (file, model) {
                (Some(file), _) => file,
                (None, Some(model)) => {
                    let config = load(workspace, config_path)?;
                    workspace.join(config.paths.hyper_file(&model))
                }
                (None, None) => anyhow::bail!("either a grid file or --model is required"),
            };
            let total = total_iterations(&path)
                .with_context(|| format!("failed to count grid points of {}", path.display()))?;
            println!("{total}");
            Ok(())
        }
        Commands::Run { dataset, model } => {
            let config = load(workspace, config_path)?;
            let mut harness = build_harness(config, workspace).await;
            let outcomes = match (dataset, model) {
                (Some(dataset), Some(model)) => vec![harness.run_default(&dataset, &model).await?],
                _ => harness.run_all_default().await?,
            };
            report(&outcomes)
        }
        Commands::Tune { dataset, model } => {
            let config = load(workspace, config_path)?;
            let mut harness = build_harness(config, workspace).await;
            let outcome = harness.run_tuning(&dataset, &model).await?;
            report(std::slice::from_ref(&outcome))
        }
    }
}

fn load(workspace: &Path, config_path: Option<&Path>) -> anyhow::Result<HarnessConfig> {
    load_config(Some(workspace), config_path)
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))
}

async fn build_harness(config: HarnessConfig, workspace: &Path) -> Harness {
    let device = resolve_device(&config).await;
    let trainer = CommandTrainer::new(&config.trainer, workspace.to_path_buf());
    tracing::info!(device = %device, program = %config.trainer.program, "Harness ready");
    Harness::new(config, workspace.to_path_buf(), Box::new(trainer), device)
}

/// Print one line per session. Failed sessions are already in the session
/// log and do not change the exit status.
fn report(outcomes: &[PairOutcome]) -> anyhow::Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        match outcome.status {
            SessionStatus::Completed => {
                println!(
                    "{} {}/{}: completed ({} run{})",
                    outcome.project_name,
                    outcome.dataset,
                    outcome.model,
                    outcome.runs,
                    if outcome.runs == 1 { "" } else { "s" }
                );
                if let (Some(run_id), Some(score)) = (&outcome.best_run_id, outcome.best_valid_score)
                {
                    println!("  best validation score {score:.4} (run {run_id})");
                }
            }
            SessionStatus::Failed => {
                failed += 1;
                println!(
                    "{} {}/{}: FAILED: {}",
                    outcome.project_name,
                    outcome.dataset,
                    outcome.model,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    if failed > 0 {
        tracing::warn!(failed, total = outcomes.len(), "Some sessions failed");
    }
    Ok(())
}

fn clear_flags(log: bool, tb: bool, results: bool, saved: bool, all: bool) -> Vec<CacheTarget> {
    if all {
        return vec![CacheTarget::All];
    }
    [
        (log, CacheTarget::Log),
        (tb, CacheTarget::Tensorboard),
        (results, CacheTarget::Results),
        (saved, CacheTarget::Saved),
    ]
    .into_iter()
    .filter_map(|(set, target)| set.then_some(target))
    .collect()
}

fn handle_clear(workspace: &Path, targets: Vec<CacheTarget>) -> anyhow::Result<()> {
    if targets.is_empty() {
        anyhow::bail!("nothing to clear: pass --log, --tb, --results, --saved or --all");
    }
    let reports = clear_targets(workspace, &targets)?;
    for report in &reports {
        println!(
            "Cleared {}: {} entr{} removed",
            report.folder.display(),
            report.removed,
            if report.removed == 1 { "y" } else { "ies" }
        );
        for (path, reason) in &report.failures {
            println!("  could not remove {}: {reason}", path.display());
        }
    }
    Ok(())
}

fn handle_stats(dir: &Path) -> anyhow::Result<()> {
    let stats = dataset_statistics(dir)
        .with_context(|| format!("failed to read dataset at {}", dir.display()))?;
    println!("Users:         {}", stats.n_users);
    println!("Items:         {}", stats.n_items);
    println!("Interactions:  {}", stats.n_inter);
    println!("Sparsity:      {:.6}", stats.sparsity);
    if stats.kg_triples > 0 {
        println!("KG entities:   {}", stats.kg_entities);
        println!("KG relations:  {}", stats.kg_relations);
        println!("KG triples:    {}", stats.kg_triples);
        println!("KG items:      {}", stats.kg_items);
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = HarnessConfig::default().to_toml_string()?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_path)?;
            println!("{}", config.to_toml_string()?);
            let knowledge: Vec<&str> = config
                .models
                .iter()
                .filter(|m| model_type(m) == ModelType::Knowledge)
                .map(String::as_str)
                .collect();
            if !knowledge.is_empty() {
                println!("# knowledge-aware models: {}", knowledge.join(", "));
            }
            Ok(())
        }
    }
}
