//! Stage pipeline CLI
//!
//! # Usage
//!
//! ```bash
//! # Run every unit of a scripted scenario concurrently
//! stage-pipeline run --script scenario.toml
//!
//! # With a config file, overrides and JSON output
//! STAGE_PIPELINE_STAGE_TIMEOUT_SECS=60 stage-pipeline run \
//!     --script scenario.toml --config pipeline.toml --max-retries 3 --json
//!
//! # Show what a retry level re-runs and reuses
//! stage-pipeline explain-level narrow
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use selective_retry::RetryLevel;
use stage_pipeline::{PipelineConfig, PipelineController, RunRequest, Script, ScriptedExecutor};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted scenario
    Run {
        /// Scenario TOML with one or more [[unit]] entries
        #[arg(long)]
        script: PathBuf,

        /// Pipeline config TOML (env vars still take precedence)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override max_retries
        #[arg(long)]
        max_retries: Option<u32>,

        /// Override stage_timeout_secs
        #[arg(long)]
        stage_timeout_secs: Option<u64>,

        /// Print JSON reports instead of summaries
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Describe a retry level
    ExplainLevel {
        /// narrow, medium or full
        level: RetryLevel,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Run {
            script,
            config,
            max_retries,
            stage_timeout_secs,
            json,
        } => {
            let config = resolve_config(config, max_retries, stage_timeout_secs)?;
            run_script(&script, config, json).await
        }
        Command::ExplainLevel { level } => {
            explain_level(level);
            Ok(())
        }
    }
}

fn resolve_config(
    path: Option<PathBuf>,
    max_retries: Option<u32>,
    stage_timeout_secs: Option<u64>,
) -> Result<PipelineConfig> {
    let mut config = match &path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid STAGE_PIPELINE_* environment override")?;
    if let Some(n) = max_retries {
        config.max_retries = n;
    }
    if let Some(secs) = stage_timeout_secs {
        config.stage_timeout_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

async fn run_script(path: &Path, config: PipelineConfig, json: bool) -> Result<()> {
    let script = Script::load(path)?;
    let controller = PipelineController::new(config);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling after current attempts");
            interrupt.cancel();
        }
    });

    info!(units = script.units.len(), "running scenario");

    let executors: Vec<ScriptedExecutor> =
        script.units.iter().map(ScriptedExecutor::from_unit).collect();
    let runs = script.units.iter().zip(&executors).map(|(unit, executor)| {
        let request = RunRequest::new(unit.label.clone()).with_feedback(unit.initial_feedback.clone());
        controller.run_with_cancel(executor, request, cancel.child_token())
    });
    let outcomes = join_all(runs).await;

    if json {
        let reports: Vec<_> = outcomes.iter().map(|o| o.report()).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for outcome in &outcomes {
            println!("{}", outcome.summary());
        }
    }

    let passed = outcomes.iter().filter(|o| o.passed).count();
    info!(passed, total = outcomes.len(), "scenario finished");
    Ok(())
}

fn explain_level(level: RetryLevel) {
    let preserved: Vec<String> = level
        .preserved_artifacts()
        .iter()
        .map(|slot| slot.to_string())
        .collect();
    let stages: Vec<&str> = level.required_stages().iter().map(|s| s.name()).collect();

    println!("level:     {}", level);
    println!(
        "preserved: {}",
        if preserved.is_empty() {
            "(nothing)".to_string()
        } else {
            preserved.join(", ")
        }
    );
    println!("runs:      {}", stages.join(" → "));
}
