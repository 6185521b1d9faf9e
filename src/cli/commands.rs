//! CLI command definitions for content-forge.
//!
//! Every command builds the same orchestrator from the environment: the
//! pipeline configuration, the SQLite job store, the LLM-backed generation and
//! judge services and the HTTP synthesis client.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{Job, JobId, Orchestrator, PipelineConfig, PipelineEvent, PrimaryInput};
use crate::scheduler::{job_channel, Dispatcher, WorkerPool, WorkerPoolConfig};
use crate::services::{HttpSynthesisClient, LlmGenerationService, LlmJudgeService};
use crate::stages::artifact_digest;
use crate::storage::{JobStore, SqliteJobStore};

/// Interval between progress checks while recovered jobs drain.
const RECOVER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Language-learning content and short-video generation workflow.
#[derive(Parser)]
#[command(name = "content-forge")]
#[command(about = "Generate language-learning activities and short videos")]
#[command(version)]
#[command(
    long_about = "content-forge runs generation jobs through Generate, structural and semantic validation, parallel post-processing and composition.\n\nJobs are persisted in SQLite and can be resumed after a crash.\n\nExample usage:\n  content-forge run-script --lang-script '今日は暑いですね' --ko-script '오늘은 덥네요'"
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
    /// Run a learning-activity job for a script pair to completion.
    #[command(name = "run-script")]
    RunScript(RunScriptArgs),

    /// Run a short-video job to completion.
    #[command(name = "run-video")]
    RunVideo(RunVideoArgs),

    /// Print a stored job.
    Status(StatusArgs),

    /// Re-drive every non-terminal job through the worker pool.
    Recover(RecoverArgs),
}

/// Options shared by the commands that run jobs.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Path of the SQLite job database.
    #[arg(long, env = "FORGE_DATABASE_PATH")]
    pub database: Option<String>,

    /// Model used for generation and review.
    #[arg(short, long, env = "LITELLM_DEFAULT_MODEL")]
    pub model: Option<String>,

    /// Only store the job; a later `recover` runs it.
    #[arg(long)]
    pub detach: bool,

    /// Print Prometheus metrics after the run.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `content-forge run-script`.
#[derive(Parser, Debug)]
pub struct RunScriptArgs {
    /// Script in the learned language.
    #[arg(long)]
    pub lang_script: String,

    /// Korean translation of the script.
    #[arg(long)]
    pub ko_script: String,

    /// Language code of the script.
    #[arg(long, default_value = "jp")]
    pub language: String,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Arguments for `content-forge run-video`.
#[derive(Parser, Debug)]
pub struct RunVideoArgs {
    /// Media genre the quotes are drawn from (e.g. anime, drama).
    #[arg(long)]
    pub media_type: String,

    /// Language of the dialogue.
    #[arg(long, default_value = "jp")]
    pub language: String,

    /// Number of scenes.
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u32,

    /// Topic; derived from the media type when omitted.
    #[arg(long)]
    pub topic: Option<String>,

    /// Requesting user recorded on the job.
    #[arg(long)]
    pub user_id: Option<String>,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Arguments for `content-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Id of the job to print.
    pub job_id: String,

    /// Path of the SQLite job database.
    #[arg(long, env = "FORGE_DATABASE_PATH")]
    pub database: Option<String>,
}

/// Arguments for `content-forge recover`.
#[derive(Parser, Debug)]
pub struct RecoverArgs {
    /// Number of workers; defaults to `FORGE_NUM_WORKERS`.
    #[arg(short, long)]
    pub workers: Option<usize>,

    #[command(flatten)]
    pub options: RunOptions,
}

/// Parse CLI arguments without executing.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse and run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli).await
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    init_metrics()?;

    match cli.command {
        Commands::RunScript(args) => {
            let input = PrimaryInput::Script {
                lang_script: args.lang_script,
                ko_script: args.ko_script,
                language: args.language,
            };
            run_job_command(input, args.options).await
        }
        Commands::RunVideo(args) => {
            let input = PrimaryInput::VideoRequest {
                media_type: args.media_type,
                language: args.language,
                count: args.count,
                topic: args.topic,
                user_id: args.user_id,
            };
            run_job_command(input, args.options).await
        }
        Commands::Status(args) => run_status_command(args).await,
        Commands::Recover(args) => run_recover_command(args).await,
    }
}

fn load_config(database: Option<&str>) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(path) = database {
        config = config.with_database_path(path);
    }
    Ok(config)
}

async fn build_orchestrator(
    config: PipelineConfig,
    model: Option<&str>,
) -> anyhow::Result<Orchestrator> {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(&config.database_path).await?);

    let llm: Arc<dyn LlmProvider> = Arc::new(LiteLlmClient::from_env()?);
    let mut generation = LlmGenerationService::new(Arc::clone(&llm))
        .with_activity_counts(config.quiz_incorrect_options, config.recommended_responses)
        .with_max_dialogue_words(config.max_dialogue_words);
    let mut judge = LlmJudgeService::new(llm);
    if let Some(model) = model {
        generation = generation.with_model(model);
        judge = judge.with_model(model);
    }

    let synthesis = HttpSynthesisClient::from_env()?;

    info!(
        database = %config.database_path,
        max_iterations = config.max_iterations,
        branch_count = config.branch_count,
        "Orchestrator configured"
    );

    Ok(Orchestrator::new(
        config,
        store,
        Arc::new(generation),
        Arc::new(judge),
        Arc::new(synthesis),
    )?)
}

/// Logs progress events until the orchestrator drops its sender.
fn spawn_event_logger() -> mpsc::Sender<PipelineEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event {
                PipelineEvent::RetryScheduled {
                    job_id,
                    iteration,
                    reason,
                    ..
                } => info!(job_id = %job_id, iteration, reason = %reason, "Retrying generation"),
                PipelineEvent::BranchCompleted {
                    job_id,
                    branch,
                    success,
                    ..
                } => info!(job_id = %job_id, branch = %branch, success, "Branch finished"),
                other => debug!(job_id = %other.job_id(), event = ?other, "Pipeline event"),
            }
        }
    });
    tx
}

async fn run_job_command(input: PrimaryInput, options: RunOptions) -> anyhow::Result<()> {
    let config = load_config(options.database.as_deref())?;
    let orchestrator = build_orchestrator(config, options.model.as_deref())
        .await?
        .with_event_sender(spawn_event_logger());

    let job = orchestrator.submit(input).await?;

    let job = if options.detach {
        job
    } else {
        orchestrator.run_to_completion(job).await?
    };
    print_job(&job)?;

    if options.metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let job_id: JobId = args
        .job_id
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid job id {}: {}", args.job_id, e))?;

    let config = load_config(args.database.as_deref())?;
    let store = SqliteJobStore::open(&config.database_path).await?;
    match store.get_job(&job_id).await? {
        Some(job) => print_job(&job),
        None => anyhow::bail!("Job {} not found", job_id),
    }
}

async fn run_recover_command(args: RecoverArgs) -> anyhow::Result<()> {
    let config = load_config(args.options.database.as_deref())?;
    let num_workers = args.workers.unwrap_or(config.num_workers);
    let orchestrator = Arc::new(
        build_orchestrator(config, args.options.model.as_deref())
            .await?
            .with_event_sender(spawn_event_logger()),
    );

    let (tx, rx) = job_channel();
    let dispatcher = Dispatcher::new(Arc::clone(orchestrator.store()), tx.clone());
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(num_workers),
        Arc::clone(&orchestrator),
        rx,
        tx,
    );
    pool.start()?;

    let recovered = dispatcher.recover().await? as u64;
    if recovered == 0 {
        println!("No active jobs to recover.");
    }

    loop {
        let stats = pool.stats();
        if stats.total_finished() + stats.persistence_failures >= recovered {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; remaining jobs resume on the next recover");
                break;
            }
            _ = tokio::time::sleep(RECOVER_POLL_INTERVAL) => {}
        }
    }

    pool.shutdown().await?;

    let stats = pool.stats();
    println!(
        "Recovered {} jobs: {} ready, {} failed, {} persistence failures",
        recovered, stats.jobs_ready, stats.jobs_failed, stats.persistence_failures
    );
    if args.options.metrics {
        println!("{}", export_metrics());
    }
    Ok(())
}

fn print_job(job: &Job) -> anyhow::Result<()> {
    let digest = job.final_artifact().map(artifact_digest).transpose()?;
    let output = serde_json::json!({
        "job": job,
        "artifact_digest": digest,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
