//! metaevo CLI - evolutionary metaprompt optimizer.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use metaevo_ai::{GeminiClient, GenerationCapability, LlmCandidateGenerator, ModelGradedEvaluator, ScoringOracle};
use metaevo_core::{BasePromptSet, RunId, RunReport, RunStatus};
use metaevo_evolution::{LlmJudge, OptimizationLoop};
use metaevo_storage::{ArtifactStore, JsonStorage};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "metaevo")]
#[command(about = "Evolutionary optimizer for prompt-rewriting instructions", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an optimization
    Run {
        /// Config file (defaults if omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Seed metaprompt text
        #[arg(long, conflicts_with = "seed_file", required_unless_present = "seed_file")]
        seed: Option<String>,
        /// File holding the seed metaprompt
        #[arg(long)]
        seed_file: Option<PathBuf>,
        /// JSON array of base prompts
        #[arg(long)]
        prompts: PathBuf,
        /// Artifact directory
        #[arg(long, default_value = "runs")]
        output: PathBuf,
    },
    /// Show a saved run
    Show {
        /// Run ID
        run_id: String,
        /// Artifact directory
        #[arg(long, default_value = "runs")]
        output: PathBuf,
    },
    /// List saved runs
    List {
        /// Artifact directory
        #[arg(long, default_value = "runs")]
        output: PathBuf,
    },
    /// Write a default config file
    InitConfig {
        /// Destination
        #[arg(long, default_value = "metaevo.json")]
        path: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            seed,
            seed_file,
            prompts,
            output,
        } => {
            let config = match config {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            let seed = match (seed, seed_file) {
                (Some(seed), _) => seed,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read seed file {}", path.display()))?,
                (None, None) => bail!("either --seed or --seed-file is required"),
            };
            let base_prompts = load_prompts(&prompts)?;

            let report = run(config, &seed, base_prompts, &output).await?;
            print_report(&report);
            if let RunStatus::Aborted { reason } = &report.status {
                bail!("run {} aborted: {}", report.run_id, reason);
            }
        }
        Commands::Show { run_id, output } => {
            let run_id: RunId = run_id.parse().map_err(|_| anyhow::anyhow!("Invalid run ID"))?;
            let storage = JsonStorage::new(&output).await?;
            let Some(report) = storage.load_report(run_id).await? else {
                println!("Run not found");
                return Ok(());
            };
            print_report(&report);
        }
        Commands::List { output } => {
            let storage = JsonStorage::new(&output).await?;
            let runs = storage.list_runs().await?;
            println!("Runs ({})", runs.len());
            for run_id in runs {
                println!("  {}", run_id);
            }
        }
        Commands::InitConfig { path } => {
            let json = serde_json::to_string_pretty(&AppConfig::default())?;
            std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
    }

    Ok(())
}

fn load_prompts(path: &Path) -> Result<BasePromptSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("invalid prompts file {}", path.display()))
}

async fn run(config: AppConfig, seed: &str, base_prompts: BasePromptSet, output: &Path) -> Result<RunReport> {
    let retry = config.optimizer.retry;
    let model = &config.model;

    let backend: Arc<dyn GenerationCapability> = Arc::new(GeminiClient::new(
        model.endpoint.as_str(),
        model.generation_model.as_str(),
        model.api_key()?,
        Duration::from_secs(model.request_timeout_secs),
    ));

    let mut grader = ModelGradedEvaluator::new(Arc::clone(&backend), retry);
    if let Some(judge_model) = &model.judge_model {
        grader = grader.with_model(judge_model.as_str());
    }
    let oracle = ScoringOracle::new(Arc::clone(&backend), Arc::new(grader), retry)
        .with_metrics(config.templates.load()?)
        .with_sampling_count(config.optimizer.sampling_count);
    let generator = LlmCandidateGenerator::new(Arc::clone(&backend), retry);
    let judge = LlmJudge::new(Arc::clone(&backend), retry).with_model(model.judge_model.clone());

    let store = Arc::new(JsonStorage::new(output).await?);
    info!("Writing run artifacts under {}", store.root().display());

    let mut optimizer = OptimizationLoop::new(
        config.optimizer,
        Arc::new(oracle),
        Arc::new(generator),
        Arc::new(judge),
    )?
    .with_store(store);

    Ok(optimizer.run(seed, base_prompts).await?)
}

fn print_report(report: &RunReport) {
    println!("Run: {}", report.run_id);
    match &report.status {
        RunStatus::Completed => println!("  Status: completed"),
        RunStatus::Aborted { reason } => println!("  Status: aborted ({})", reason),
    }
    println!("  Started: {}", report.started_at);
    println!("  Finished: {}", report.finished_at);

    println!("Generations ({})", report.history.len());
    for generation in report.history.iter() {
        println!(
            "  {} | best {:.3} | mean {:.3} | {} evaluated | {} parents | {} failed{}",
            generation.index,
            generation.best_score().unwrap_or_default(),
            generation.mean_score().unwrap_or_default(),
            generation.candidates.len(),
            generation.parents.len(),
            generation.evaluation_failures.len(),
            if generation.tie_break.is_some() { " | tie" } else { "" },
        );
    }

    if let Some(best) = report.best_metaprompt() {
        println!();
        println!("Best metaprompt:");
        println!("{}", best);
    }
}
