//! The batcher's end-to-end algorithm (spec §4.3 steps 1-9): acquire
//! the directory lock, create a run, stream and pack files, enqueue
//! paused `analyze-file` jobs, wire up the parent/child barrier, then
//! resume and release the lock.

use crate::pack::BatchPacker;
use crate::tokenizer::count_tokens;
use crate::walker::stream_paths;
use pipeline_core::context::RunContext;
use pipeline_core::error::{PipelineError, Result};
use pipeline_core::model::Run;
use pipeline_queue::{Broker, JobHandle, QueueManager};
use pipeline_store::repositories::runs;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_LOCK_TTL_MS: u64 = 10 * 60 * 1000;

pub struct BatcherOutcome {
    pub run_id: String,
    pub files_discovered: u64,
    pub batches_enqueued: usize,
}

/// Run one discovery-and-batching pass. Returns `Ok(None)` if another
/// producer already holds the directory lock (clean exit, not an
/// error, per the error handling design's "lock contention" row).
pub async fn run_batcher<B: Broker + 'static>(
    ctx: &RunContext,
    pool: &SqlitePool,
    queue_manager: &Arc<QueueManager<B>>,
) -> Result<Option<BatcherOutcome>> {
    let config = &ctx.config;
    let lock_key = format!("discovery:{}", config.target_directory);

    if !queue_manager.broker().acquire_lock(&lock_key, DEFAULT_LOCK_TTL_MS).await? {
        info!(lock_key, "discovery lock held by another producer, exiting cleanly");
        return Ok(None);
    }

    let result = run_batcher_locked(ctx, pool, queue_manager).await;

    if let Err(e) = queue_manager.broker().release_lock(&lock_key).await {
        warn!(error = %e, "failed to release discovery lock");
    }

    result
}

async fn run_batcher_locked<B: Broker + 'static>(
    ctx: &RunContext,
    pool: &SqlitePool,
    queue_manager: &Arc<QueueManager<B>>,
) -> Result<Option<BatcherOutcome>> {
    let config = &ctx.config;
    let run_id = Uuid::new_v4().to_string();
    runs::create(pool, &Run::new(run_id.clone())).await?;

    let parent = queue_manager
        .enqueue("graph-build-queue", serde_json::json!({ "runId": run_id }).to_string())
        .await?;

    let root = Path::new(&config.target_directory);
    let rx = stream_paths(root, &config.glob_patterns, &config.ignore_patterns)
        .map_err(|e| PipelineError::partial("batcher::stream_paths", e.to_string()))?;

    let budget = config.effective_token_budget();
    let mut packer = BatchPacker::new(run_id.clone(), budget);
    let mut child_handles: Vec<JobHandle> = Vec::new();
    let mut files_discovered = 0u64;

    for path in rx.iter() {
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file, run continues");
                continue;
            }
        };
        files_discovered += 1;
        let tokens = count_tokens(&content);
        let path_str = path.to_string_lossy().into_owned();

        for batch in packer.push(path_str, content, tokens) {
            let handle = enqueue_batch(queue_manager, &run_id, batch).await?;
            child_handles.push(handle);
        }
    }
    if let Some(batch) = packer.finish() {
        let handle = enqueue_batch(queue_manager, &run_id, batch).await?;
        child_handles.push(handle);
    }

    runs::set_files_discovered(pool, &run_id, files_discovered).await?;

    // This is the mandatory ordering from spec §4.1: dependencies must
    // be registered before any child is resumed, or a child could
    // complete and prematurely finalize the parent.
    queue_manager.add_dependencies(&parent, &child_handles).await?;
    for child in &child_handles {
        queue_manager.resume(child).await?;
    }

    Ok(Some(BatcherOutcome {
        run_id,
        files_discovered,
        batches_enqueued: child_handles.len(),
    }))
}

async fn enqueue_batch<B: Broker + 'static>(
    queue_manager: &Arc<QueueManager<B>>,
    run_id: &str,
    batch: pipeline_core::model::Batch,
) -> Result<JobHandle> {
    let payload = serde_json::json!({
        "batchId": batch.batch_id,
        "runId": run_id,
        "files": batch.files.iter().map(|f| serde_json::json!({"path": f.path, "content": f.content, "tokens": f.tokens})).collect::<Vec<_>>(),
    })
    .to_string();
    let mut handles = queue_manager.enqueue_bulk_paused("file-analysis-queue", vec![payload]).await?;
    Ok(handles.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::config::PipelineConfig;
    use pipeline_queue::{InMemoryBroker, RetryPolicy};
    use pipeline_store::connection::DatabaseConnection;
    use std::sync::Arc;

    #[tokio::test]
    async fn discovers_files_and_wires_parent_child_barrier() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();

        let mut config = PipelineConfig::default();
        config.target_directory = dir.path().to_string_lossy().into_owned();
        config.glob_patterns = vec!["*.rs".to_string()];

        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();

        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(QueueManager::new(broker.clone(), RetryPolicy::default()));
        let ctx = RunContext::new("ignored", config);

        let outcome = run_batcher(&ctx, conn.pool(), &manager).await.unwrap().unwrap();
        assert_eq!(outcome.files_discovered, 2);
        // Both files are tiny, so the greedy packer fits them in one batch.
        assert_eq!(outcome.batches_enqueued, 1);

        // Parent is gated until both children terminate.
        assert!(broker.claim_next("graph-build-queue", 1000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_producer_exits_cleanly_when_lock_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.target_directory = dir.path().to_string_lossy().into_owned();

        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(QueueManager::new(broker.clone(), RetryPolicy::default()));
        let ctx = RunContext::new("ignored", config);

        let lock_key = format!("discovery:{}", ctx.config.target_directory);
        assert!(broker.acquire_lock(&lock_key, 60_000).await.unwrap());

        let outcome = run_batcher(&ctx, conn.pool(), &manager).await.unwrap();
        assert!(outcome.is_none());
    }
}
