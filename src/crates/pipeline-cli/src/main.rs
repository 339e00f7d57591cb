//! Command-line entry point: loads configuration, wires the queue,
//! store, batcher, workers, reconciler, and graph sink together, and
//! drives one end-to-end pipeline run.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline_batcher::run_batcher;
use pipeline_core::config::PipelineConfig;
use pipeline_core::context::RunContext;
use pipeline_core::model::FileStatus;
use pipeline_graph::{finalize_run, NullGraphSink};
use pipeline_outbox::OutboxPublisher;
use pipeline_queue::{Broker, InMemoryBroker, QueueManager, RedisBroker, RetryPolicy};
use pipeline_reconcile::{reconcile_run, Thresholds};
use pipeline_store::connection::DatabaseConnection;
use pipeline_store::repositories::{files, runs};
use pipeline_worker::{AggregationScope, AggregationWorker, FileAnalysisWorker};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Code knowledge graph analysis pipeline", long_about = None)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the store migrations and exit.
    Migrate,
    /// Print a run's progress.
    Status {
        run_id: String,
    },
    /// Discover files, analyze them, reconcile evidence, and finalize
    /// the graph for one run.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let config = PipelineConfig::load(&args.config).context("loading pipeline configuration")?;

    match args.command {
        Command::Migrate => migrate(&config).await,
        Command::Status { run_id } => status(&config, &run_id).await,
        Command::Run => run(config).await,
    }
}

async fn migrate(config: &PipelineConfig) -> Result<()> {
    let conn = DatabaseConnection::connect(&config.db_path).await.context("connecting to database")?;
    conn.run_migrations().await.context("running migrations")?;
    info!(db_path = %config.db_path, "migrations applied");
    Ok(())
}

async fn status(config: &PipelineConfig, run_id: &str) -> Result<()> {
    let conn = DatabaseConnection::connect(&config.db_path).await.context("connecting to database")?;
    let run = runs::get(conn.pool(), run_id).await?.context("run not found")?;
    let completed = files::list_by_status(conn.pool(), FileStatus::Completed).await?.len();
    let errored = files::list_by_status(conn.pool(), FileStatus::Error).await?.len();
    println!("run:        {}", run.run_id);
    println!("started:    {}", run.started_at);
    println!("finished:   {:?}", run.finished_at);
    println!("discovered: {}", run.files_discovered);
    println!("completed:  {completed}");
    println!("errored:    {errored}");
    Ok(())
}

async fn run(config: PipelineConfig) -> Result<()> {
    let conn = DatabaseConnection::connect(&config.db_path).await.context("connecting to database")?;
    conn.run_migrations().await.context("running migrations")?;

    if config.broker_url.starts_with("redis://") || config.broker_url.starts_with("rediss://") {
        let redis_config = deadpool_redis::Config::from_url(&config.broker_url);
        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .context("building redis connection pool")?;
        execute(config, conn, Arc::new(RedisBroker::new(pool))).await
    } else {
        warn!("broker_url is not a redis:// URL, falling back to the in-memory broker for this run");
        execute(config, conn, Arc::new(InMemoryBroker::new())).await
    }
}

/// Runs one full pass over the configured target directory: discovery
/// and batching, file analysis, directory/global re-review, confidence
/// reconciliation, and graph finalization, with the config's LLM and
/// graph-sink endpoints (or in-process test doubles when unset).
async fn execute<B: Broker + 'static>(
    config: PipelineConfig,
    conn: DatabaseConnection,
    broker: Arc<B>,
) -> Result<()> {
    let pool = conn.pool().clone();
    let queue_manager = Arc::new(QueueManager::new(broker, RetryPolicy::new(config.job_max_attempts)));

    let outbox_publisher = Arc::new(OutboxPublisher::new(pool.clone(), queue_manager.clone()));
    let outbox_shutdown = tokio_util::sync::CancellationToken::new();
    let outbox_handle = {
        let publisher = outbox_publisher.clone();
        let shutdown = outbox_shutdown.clone();
        tokio::spawn(async move { publisher.run(shutdown).await })
    };

    let runner: Arc<dyn llm::PromptRunner> = Arc::new(build_llm_runner(&config)?);

    let file_worker = Arc::new(FileAnalysisWorker::new(pool.clone(), runner.clone()));
    queue_manager.create_worker("file-analysis-queue", config.worker_concurrency, {
        let worker = file_worker.clone();
        move |payload: String| {
            let worker = worker.clone();
            async move { worker.handle(payload).await }
        }
    });
    queue_manager.spawn_stalled_reaper("file-analysis-queue", config.poll_interval_ms);

    // Each file-analysis finding is republished here by the outbox
    // publisher; resolving it re-reviews that finding's directory at
    // the wider scope (spec §4.6's directory pass).
    let directory_worker = Arc::new(AggregationWorker::directory(pool.clone(), runner.clone()));
    queue_manager.create_worker("relationship-resolution-queue", config.worker_concurrency, {
        let worker = directory_worker.clone();
        let pool = pool.clone();
        move |payload: String| {
            let worker = worker.clone();
            let pool = pool.clone();
            async move { handle_relationship_resolution(&pool, &worker, payload).await }
        }
    });
    queue_manager.spawn_stalled_reaper("relationship-resolution-queue", config.poll_interval_ms);

    // The batcher enqueues this job paused and dependent on every
    // analyze-file child it creates; it only becomes claimable once
    // the parent/child barrier releases it, which is also true of
    // every child that gets dead-lettered rather than completed.
    queue_manager.create_worker("graph-build-queue", 1, {
        let pool = pool.clone();
        let runner = runner.clone();
        let config = config.clone();
        move |payload: String| {
            let pool = pool.clone();
            let runner = runner.clone();
            let config = config.clone();
            async move { handle_graph_build(&pool, &runner, &config, payload).await }
        }
    });
    queue_manager.spawn_stalled_reaper("graph-build-queue", config.poll_interval_ms);

    let run_context = RunContext::new(uuid::Uuid::new_v4().to_string(), config.clone());
    let Some(outcome) = run_batcher(&run_context, &pool, &queue_manager).await? else {
        info!("another producer holds the discovery lock; nothing to do this pass");
        outbox_shutdown.cancel();
        let _ = outbox_handle.await;
        queue_manager.close(Duration::from_secs(5)).await;
        return Ok(());
    };
    info!(run_id = %outcome.run_id, files = outcome.files_discovered, batches = outcome.batches_enqueued, "discovery complete");

    wait_for_run_finished(&pool, &outcome.run_id, Duration::from_millis(config.poll_interval_ms)).await?;

    outbox_shutdown.cancel();
    let _ = outbox_handle.await;
    queue_manager.close(Duration::from_secs(5)).await;
    Ok(())
}

#[derive(Deserialize)]
struct RelationshipResolutionPayload {
    #[serde(rename = "run_id")]
    run_id: String,
    #[serde(rename = "file_id")]
    file_id: String,
}

/// Handle one `relationship-resolution-queue` job: look up the
/// finding's file to recover its directory, then run the directory
/// resolution pass over that directory's candidate relationships.
async fn handle_relationship_resolution(
    pool: &sqlx::SqlitePool,
    worker: &AggregationWorker,
    payload: String,
) -> std::result::Result<(), String> {
    let job: RelationshipResolutionPayload =
        serde_json::from_str(&payload).map_err(|e| format!("malformed job payload: {e}"))?;
    let file = files::get_by_id(pool, &job.file_id)
        .await
        .map_err(|e| format!("database error: {e}"))?
        .ok_or_else(|| format!("file {} not found", job.file_id))?;
    let directory = std::path::Path::new(&file.path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    worker.run(&job.run_id, AggregationScope::Directory(directory)).await?;
    Ok(())
}

#[derive(Deserialize)]
struct GraphBuildPayload {
    #[serde(rename = "runId")]
    run_id: String,
}

/// Handle the `graph-build-queue` finalization job: only claimable
/// once every analyze-file child of this run has completed or been
/// dead-lettered. Runs the global resolution pass, reconciles
/// confidence scores, merges validated relationships into the graph
/// sink, then marks the run finished.
async fn handle_graph_build(
    pool: &sqlx::SqlitePool,
    runner: &Arc<dyn llm::PromptRunner>,
    config: &PipelineConfig,
    payload: String,
) -> std::result::Result<(), String> {
    let job: GraphBuildPayload = serde_json::from_str(&payload).map_err(|e| format!("malformed job payload: {e}"))?;

    let global_worker = AggregationWorker::global(pool.clone(), runner.clone());
    let reviewed = global_worker.run(&job.run_id, AggregationScope::Global).await?;
    info!(run_id = %job.run_id, reviewed, "global resolution pass complete");

    let thresholds = Thresholds { validate: config.validate_threshold, discard: config.discard_threshold };
    let reconciled = reconcile_run(pool, &job.run_id, thresholds).await.map_err(|e| format!("database error: {e}"))?;
    info!(run_id = %job.run_id, reconciled, "reconciliation complete");

    let sink = NullGraphSink::new();
    let finalized = finalize_run(pool, &sink, &job.run_id).await?;
    info!(run_id = %job.run_id, merged = finalized.merged, dead_lettered = finalized.dead_letter_ids.len(), "graph finalization complete");

    runs::mark_finished(pool, &job.run_id, None).await.map_err(|e| format!("database error: {e}"))?;
    Ok(())
}

fn build_llm_runner(config: &PipelineConfig) -> Result<llm::OpenAiCompatibleRunner> {
    let base_url = config.llm_url.clone().context("PIPELINE_LLM_URL must be set to run analysis")?;
    let api_key = std::env::var("PIPELINE_LLM_API_KEY").context("PIPELINE_LLM_API_KEY must be set to run analysis")?;
    let model = std::env::var("PIPELINE_LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
    Ok(llm::OpenAiCompatibleRunner::new(llm::RemoteLlmConfig::new(api_key, base_url, model)))
}

/// Polls the run row's `finished_at` column, the signal that the
/// graph-build-queue job (released only once every analyze-file child
/// has completed or been dead-lettered) has run to completion.
async fn wait_for_run_finished(pool: &sqlx::SqlitePool, run_id: &str, interval: Duration) -> Result<()> {
    const MAX_TICKS: usize = 600;
    for _ in 0..MAX_TICKS {
        if let Some(run) = runs::get(pool, run_id).await? {
            if run.finished_at.is_some() {
                return Ok(());
            }
        }
        tokio::time::sleep(interval).await;
    }
    warn!(run_id, "timed out waiting for the run to finish");
    Ok(())
}
