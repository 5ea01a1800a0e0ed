//! CLI command definitions for alpha_forge.
//!
//! `run` drives a worker pool over a task file until every task has reported,
//! the runtime cap is hit or Ctrl-C arrives. `config` prints the effective
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::metrics::{init_metrics, write_metrics};
use crate::scheduler::{
    InMemoryResultSink, InMemoryScheduler, JsonlResultSink, PoolError, PoolStatus, ResultSink,
    Scheduler, SimulationTask, SimulationWorkerFactory, WorkerPool,
};

/// How often `run` checks whether every task has reported.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Quota-aware simulation runner for the alpha research platform.
#[derive(Parser)]
#[command(name = "alpha-forge")]
#[command(about = "Run alpha simulations through a pool of quota-aware workers")]
#[command(version)]
#[command(
    long_about = "alpha-forge submits alpha simulations to the research platform through a pool of workers.\n\nEach worker respects the platform's rate-limit headers, retries transient failures and polls simulations to completion.\n\nExample usage:\n  alpha-forge run --tasks alphas.yaml --workers 4 --output results.jsonl"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run every simulation in a task file through the worker pool.
    #[command(alias = "simulate")]
    Run(RunArgs),

    /// Print the effective configuration with secrets redacted.
    #[command(alias = "show-config")]
    Config(ConfigArgs),
}

/// Arguments for `alpha-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML or JSON file listing the simulations to run.
    #[arg(short = 't', long)]
    pub tasks: PathBuf,

    /// YAML configuration file.
    #[arg(short = 'c', long, env = "ALPHA_FORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of workers to start with.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Seconds without activity before a worker is restarted (0 disables).
    #[arg(long)]
    pub worker_timeout: Option<u64>,

    /// Complete tasks locally without calling the platform.
    #[arg(long)]
    pub dry_run: bool,

    /// Append one JSON line per completed task to this file.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Platform username.
    #[arg(long)]
    pub username: Option<String>,

    /// Platform password.
    #[arg(long)]
    pub password: Option<String>,

    /// Platform base URL.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Stop after this many seconds even if tasks remain.
    #[arg(long)]
    pub max_runtime: Option<u64>,

    /// Write a Prometheus metrics snapshot to this file on exit.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `alpha-forge config`.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file.
    #[arg(short = 'c', long, env = "ALPHA_FORGE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// One entry of a task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFileEntry {
    /// Defaults to the 1-based position in the file.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub priority: i32,
    /// Simulation request body, sent as-is.
    pub payload: serde_json::Value,
}

/// Why `run` stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    Interrupted,
    RuntimeLimit,
}

/// JSON summary printed by `run --json`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub total_tasks: usize,
    pub output: Option<PathBuf>,
    pub status: PoolStatus,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pool_command(args).await,
        Commands::Config(args) => run_config_command(args),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pool_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;

    if let Err(e) = init_metrics() {
        warn!(error = %e, "Metrics disabled");
    }

    let tasks = load_tasks(&args.tasks)?;
    let total_tasks = tasks.len();
    if total_tasks == 0 {
        anyhow::bail!("Task file {} contains no tasks", args.tasks.display());
    }

    let scheduler = Arc::new(
        InMemoryScheduler::with_tasks(tasks).context("Failed to queue tasks")?,
    );
    let factory = SimulationWorkerFactory::from_client_config(
        scheduler.clone(),
        config.client.clone(),
        config.worker.clone(),
    );

    let sink: Arc<dyn ResultSink> = match &args.output {
        Some(path) => Arc::new(
            JsonlResultSink::open(path)
                .await
                .with_context(|| format!("Failed to open output file {}", path.display()))?,
        ),
        None => Arc::new(InMemoryResultSink::new()),
    };

    info!(
        tasks = total_tasks,
        workers = config.pool.initial_workers.max(1),
        dry_run = config.dry_run(),
        "Starting simulation run"
    );

    let pool = WorkerPool::with_result_sink(config.pool.clone(), Arc::new(factory), sink);
    pool.start().await;

    let deadline = async {
        match args.max_runtime {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let stop_reason = tokio::select! {
        _ = wait_for_completion(&pool, scheduler.as_ref(), total_tasks) => StopReason::Completed,
        _ = tokio::signal::ctrl_c() => StopReason::Interrupted,
        _ = deadline => StopReason::RuntimeLimit,
    };
    info!(reason = ?stop_reason, "Stopping simulation run");

    match pool.stop().await {
        Ok(()) => {}
        Err(PoolError::ShutdownTimeout(timeout)) => {
            warn!(
                timeout_secs = timeout.as_secs_f64(),
                "Some workers were aborted before finishing their task"
            );
        }
    }

    if let Some(path) = &args.metrics_out {
        write_metrics(path)
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Metrics written");
    }

    let summary = RunSummary {
        stop_reason,
        total_tasks,
        output: args.output.clone(),
        status: pool.status(),
    };

    if args.json {
        let json_output = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

/// Layers CLI flags over the file and environment configuration.
fn build_config(args: &RunArgs) -> anyhow::Result<AppConfig> {
    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(workers) = args.workers {
        config.pool.initial_workers = workers;
    }
    if let Some(secs) = args.worker_timeout {
        config.pool.worker_timeout = Duration::from_secs(secs);
    }
    if args.dry_run {
        config.set_dry_run(true);
    }
    if let Some(base_url) = &args.base_url {
        config.client.base_url = base_url.clone();
    }
    if let Some(username) = &args.username {
        config.client.username = Some(username.clone());
    }
    if let Some(password) = &args.password {
        config.client.password = Some(password.clone());
    }

    config.validate()?;
    if !config.dry_run() {
        config.require_credentials()?;
    }
    Ok(config)
}

/// Loads a YAML or JSON task file.
fn load_tasks(path: &Path) -> anyhow::Result<Vec<SimulationTask>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file {}", path.display()))?;
    parse_tasks(&content).with_context(|| format!("Invalid task file {}", path.display()))
}

fn parse_tasks(content: &str) -> anyhow::Result<Vec<SimulationTask>> {
    // JSON documents are valid YAML.
    let entries: Vec<TaskFileEntry> = serde_yaml::from_str(content)?;

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let id = entry.id.unwrap_or(index as u64 + 1);
            SimulationTask::new(id, entry.payload).with_priority(entry.priority)
        })
        .collect())
}

async fn wait_for_completion(pool: &WorkerPool, scheduler: &dyn Scheduler, total_tasks: usize) {
    let mut ticker = tokio::time::interval(COMPLETION_POLL_INTERVAL);
    let mut queue_drained = false;
    loop {
        ticker.tick().await;
        if pool.status().processed_tasks >= total_tasks as u64 {
            return;
        }
        if !queue_drained && !scheduler.has_tasks().await {
            queue_drained = true;
            info!(
                in_flight = (total_tasks as u64).saturating_sub(pool.status().processed_tasks),
                "All tasks handed out, waiting for in-flight results"
            );
        }
    }
}

fn print_summary(summary: &RunSummary) {
    let status = &summary.status;
    println!("Run finished ({:?})", summary.stop_reason);
    println!(
        "  Tasks:     {}/{} processed, {} failed",
        status.processed_tasks, summary.total_tasks, status.failed_tasks
    );
    if let Some(rate) = status.success_rate {
        println!("  Success:   {:.1}%", rate * 100.0);
    }
    println!("  Avg time:  {:.1}s", status.avg_task_duration);
    if let Some(uptime) = status.uptime_seconds {
        println!("  Uptime:    {:.0}s", uptime);
    }
    if let Some(path) = &summary.output {
        println!("  Results:   {}", path.display());
    }
    if status.dry_run {
        println!("  (dry run, no simulations were submitted)");
    }
}

// ============================================================================
// Config Command Implementation
// ============================================================================

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Err(e) = config.validate() {
        warn!(error = %e, "Configuration is not valid for a run");
    }
    print!("{}", config.to_redacted_yaml()?);
    Ok(())
}
