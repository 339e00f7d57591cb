//! Run-scoped context threaded explicitly through every component.
//!
//! Design note addressed here: the source this system was distilled from
//! relied on global mutable singletons for its queue manager and DB
//! handle. Those are replaced with an explicit [`RunContext`] whose
//! lifetime is tied to one top-level run and which callers pass down
//! rather than reach for through statics.

use crate::config::PipelineConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handles shared by every worker in a single pipeline run.
///
/// Cloning is cheap (`Arc`/`CancellationToken` clones); every worker
/// holds its own clone rather than a reference, so workers can be
/// spawned as independent `tokio` tasks with `'static` lifetimes.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub config: Arc<PipelineConfig>,
    cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, config: PipelineConfig) -> Self {
        Self {
            run_id: run_id.into(),
            config: Arc::new(config),
            cancellation: CancellationToken::new(),
        }
    }

    /// Token suspension points (LLM calls, queue ops, DB transactions,
    /// graph-sink calls) should select against, so that on cancellation
    /// in-flight work can roll back / NACK rather than run to completion.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Signal every holder of this context's cancellation token to wind
    /// down. Idempotent.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
