//! Job record and status shared by every broker implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Enqueued via `enqueue_bulk_paused`; invisible to workers until
    /// `resume` clears this flag. Prevents the child-completes-before-
    /// dependencies-registered race.
    Paused,
    /// Eligible for a worker to pick up.
    Waiting,
    /// A parent job waiting on all children to terminate.
    WaitingChildren,
    /// Currently held by a worker.
    Active,
    Completed,
    Failed,
    /// Moved to `<queue>:dead` after exceeding `max_attempts`.
    DeadLettered,
}

/// A job enqueued onto a named queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub payload: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// When this job becomes eligible again after a retry backoff.
    pub available_at: DateTime<Utc>,
    /// Last heartbeat from the worker holding this job, used for stalled
    /// detection.
    pub locked_until: Option<DateTime<Utc>>,
    pub parent: Option<JobHandle>,
    /// Children still outstanding for a `WaitingChildren` parent.
    pub pending_children: Vec<String>,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(queue: impl Into<String>, payload: String, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.into(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts,
            created_at: now,
            available_at: now,
            locked_until: None,
            parent: None,
            pending_children: Vec::new(),
            last_error: None,
        }
    }

    pub fn paused(queue: impl Into<String>, payload: String, max_attempts: u32) -> Self {
        let mut job = Self::new(queue, payload, max_attempts);
        job.state = JobState::Paused;
        job
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            JobState::Completed | JobState::Failed | JobState::DeadLettered
        )
    }
}

/// Opaque handle returned to callers so they don't need the full record
/// to reference a job (mirrors the broker's `jobHandle` contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub queue: String,
    pub id: String,
}

impl From<&JobRecord> for JobHandle {
    fn from(job: &JobRecord) -> Self {
        Self {
            queue: job.queue.clone(),
            id: job.id.clone(),
        }
    }
}
