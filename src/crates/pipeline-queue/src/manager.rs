//! Queue manager: enqueue/dequeue, retry/backoff, dead-lettering,
//! stalled-job detection, and the parent/child dependency barrier.

use crate::broker::Broker;
use crate::job::{JobHandle, JobRecord, JobState};
use crate::retry::RetryPolicy;
use pipeline_core::error::{classify_message, ErrorClass, PipelineError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default worker heartbeat/stalled-detection window.
const DEFAULT_STALLED_INTERVAL_MS: u64 = 30_000;

fn dead_queue_name(queue: &str) -> String {
    format!("{queue}:dead")
}

/// Typed job queue manager over a [`Broker`].
pub struct QueueManager<B: Broker> {
    broker: Arc<B>,
    retry_policy: RetryPolicy,
    stalled_interval_ms: u64,
    shutdown: CancellationToken,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<B: Broker + 'static> QueueManager<B> {
    pub fn new(broker: Arc<B>, retry_policy: RetryPolicy) -> Self {
        Self {
            broker,
            retry_policy,
            stalled_interval_ms: DEFAULT_STALLED_INTERVAL_MS,
            shutdown: CancellationToken::new(),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_stalled_interval_ms(mut self, ms: u64) -> Self {
        self.stalled_interval_ms = ms;
        self
    }

    /// Enqueue a single job, immediately eligible for workers.
    pub async fn enqueue(&self, queue: &str, payload: String) -> Result<JobHandle> {
        let job = JobRecord::new(queue, payload, self.retry_policy.max_attempts);
        let handle = JobHandle::from(&job);
        self.broker.insert_job(job).await?;
        Ok(handle)
    }

    /// Enqueue a batch of jobs in the `Paused` state: no worker can
    /// fetch them until [`Self::resume`] is called. This lets a caller
    /// register parent/child dependencies before any child can complete,
    /// closing the race spec.md calls out as mandatory.
    pub async fn enqueue_bulk_paused(
        &self,
        queue: &str,
        payloads: Vec<String>,
    ) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let job = JobRecord::paused(queue, payload, self.retry_policy.max_attempts);
            let handle = JobHandle::from(&job);
            self.broker.insert_job(job).await?;
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Release paused jobs to workers.
    pub async fn resume(&self, handle: &JobHandle) -> Result<()> {
        if let Some(mut job) = self.broker.get_job(&handle.queue, &handle.id).await? {
            if job.state == JobState::Paused {
                job.state = JobState::Waiting;
                self.broker.update_job(job).await?;
            }
        }
        Ok(())
    }

    /// Link `children` to `parent`, putting `parent` into
    /// `WaitingChildren` until every child terminates. Must be called
    /// before [`Self::resume`] on the children (see spec.md §4.1).
    pub async fn add_dependencies(&self, parent: &JobHandle, children: &[JobHandle]) -> Result<()> {
        let mut parent_job = self
            .broker
            .get_job(&parent.queue, &parent.id)
            .await?
            .ok_or_else(|| PipelineError::fatal("add_dependencies", "parent job not found"))?;
        parent_job.state = JobState::WaitingChildren;
        parent_job.pending_children = children.iter().map(|c| c.id.clone()).collect();
        self.broker.update_job(parent_job).await?;

        for child in children {
            if let Some(mut child_job) = self.broker.get_job(&child.queue, &child.id).await? {
                child_job.parent = Some(parent.clone());
                self.broker.update_job(child_job).await?;
            }
        }
        Ok(())
    }

    /// Record that a child job terminated; if it was the last pending
    /// child of a `WaitingChildren` parent, flip the parent to `Waiting`
    /// so its own worker can pick it up. This is the only strict
    /// happens-before barrier in the system.
    async fn complete_child(&self, child: &JobRecord) -> Result<()> {
        let Some(parent_handle) = &child.parent else {
            return Ok(());
        };
        let Some(mut parent_job) = self
            .broker
            .get_job(&parent_handle.queue, &parent_handle.id)
            .await?
        else {
            return Ok(());
        };
        parent_job.pending_children.retain(|id| id != &child.id);
        if parent_job.pending_children.is_empty() && parent_job.state == JobState::WaitingChildren
        {
            parent_job.state = JobState::Waiting;
            info!(
                parent = %parent_job.id,
                "all children terminated, releasing parent from waiting-children"
            );
        }
        self.broker.update_job(parent_job).await?;
        Ok(())
    }

    /// Spawn a worker pool for `queue`. `handler` is invoked with the
    /// job payload; an `Err` triggers retry-with-backoff up to
    /// `max_attempts`, after which the job is dead-lettered.
    pub fn create_worker<F, Fut>(self: &Arc<Self>, queue: &str, concurrency: usize, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let queue = queue.to_string();
        for worker_index in 0..concurrency {
            let manager = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let queue = queue.clone();
            let shutdown = self.shutdown.clone();
            let join = tokio::spawn(async move {
                manager.worker_loop(worker_index, queue, handler, shutdown).await;
            });
            self.workers.lock().unwrap().push(join);
        }
    }

    async fn worker_loop<F, Fut>(
        &self,
        worker_index: usize,
        queue: String,
        handler: Arc<F>,
        shutdown: CancellationToken,
    ) where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), String>> + Send + 'static,
    {
        loop {
            if shutdown.is_cancelled() {
                debug!(queue, worker_index, "worker shutting down");
                return;
            }
            match self.broker.claim_next(&queue, self.stalled_interval_ms).await {
                Ok(Some(job)) => self.run_job(job, handler.as_ref()).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        _ = shutdown.cancelled() => return,
                    }
                }
                Err(e) => {
                    warn!(queue, error = %e, "broker error while claiming job, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn run_job<F, Fut>(&self, mut job: JobRecord, handler: &F)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<(), String>>,
    {
        let result = handler(job.payload.clone()).await;
        match result {
            Ok(()) => {
                job.state = JobState::Completed;
                if let Err(e) = self.broker.update_job(job.clone()).await {
                    error!(job = %job.id, error = %e, "failed to persist job completion");
                }
                if let Err(e) = self.complete_child(&job).await {
                    error!(job = %job.id, error = %e, "failed to propagate child completion");
                }
            }
            Err(message) => self.handle_failure(job, message).await,
        }
    }

    async fn handle_failure(&self, mut job: JobRecord, message: String) {
        job.last_error = Some(message.clone());
        let class = classify_message(&message);

        let should_retry = class == ErrorClass::Transient && job.attempts < job.max_attempts;
        if should_retry {
            let delay = self.retry_policy.backoff_delay(job.attempts);
            job.state = JobState::Waiting;
            job.available_at = chrono::Utc::now() + chrono::Duration::from_std(delay).unwrap();
            warn!(job = %job.id, attempt = job.attempts, delay_ms = delay.as_millis(), "retrying job after transient error");
            if let Err(e) = self.broker.update_job(job).await {
                error!(error = %e, "failed to persist retry state");
            }
            return;
        }

        // Deterministic, fatal, or retries-exhausted: dead-letter.
        job.state = JobState::DeadLettered;
        error!(job = %job.id, error = %message, attempts = job.attempts, "job dead-lettered");
        let dead_payload = serde_json::json!({
            "original_payload": job.payload,
            "error": message,
            "attempts": job.attempts,
        })
        .to_string();
        let mut dead_job = JobRecord::new(dead_queue_name(&job.queue), dead_payload, 0);
        dead_job.state = JobState::DeadLettered;
        if let Err(e) = self.broker.insert_job(dead_job).await {
            error!(error = %e, "failed to record dead-lettered job");
        }
        if let Err(e) = self.broker.update_job(job.clone()).await {
            error!(error = %e, "failed to persist dead-letter state on original job");
        }
        if let Err(e) = self.complete_child(&job).await {
            error!(job = %job.id, error = %e, "failed to propagate child termination (dead-letter)");
        }
    }

    /// Periodically reclaim jobs whose lease expired without a
    /// heartbeat so another worker can retry them.
    pub fn spawn_stalled_reaper(self: &Arc<Self>, queue: &str, interval_ms: u64) {
        let manager = Arc::clone(self);
        let queue = queue.to_string();
        let shutdown = self.shutdown.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                    _ = shutdown.cancelled() => return,
                }
                match manager.broker.list_stalled(&queue).await {
                    Ok(stalled) => {
                        for mut job in stalled {
                            warn!(job = %job.id, "reclaiming stalled job");
                            job.state = JobState::Waiting;
                            job.available_at = chrono::Utc::now();
                            job.locked_until = None;
                            let _ = manager.broker.update_job(job).await;
                        }
                    }
                    Err(e) => error!(error = %e, "failed to list stalled jobs"),
                }
            }
        });
        self.workers.lock().unwrap().push(join);
    }

    /// Drain in-flight jobs up to `timeout`, then force-close.
    pub async fn close(&self, timeout: Duration) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("queue manager close timed out; workers force-aborted");
        }
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }
}
