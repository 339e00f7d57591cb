//! Maps `sqlx::Error` onto the shared `PipelineError`, since
//! `pipeline-core` deliberately has no `sqlx` dependency of its own.

use pipeline_core::error::PipelineError;

pub fn map_sqlx(err: sqlx::Error) -> PipelineError {
    PipelineError::Database(err.to_string())
}
