//! Shared error type for the analysis pipeline.

use thiserror::Error;

/// Result type used across pipeline crates.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur anywhere in the pipeline.
///
/// Variants are grouped by the error-kind table in the error handling
/// design: transient errors are retried by callers, deterministic and
/// fatal errors are not.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transient failure talking to the LLM, the broker, or the graph sink.
    #[error("transient error in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// LLM output violated the JSON schema contract after sanitization.
    #[error("deterministic contract violation in {operation}: {message}")]
    Contract { operation: String, message: String },

    /// A single file or row could not be processed but the run continues.
    #[error("partial failure in {operation}: {message}")]
    Partial { operation: String, message: String },

    /// Unrecoverable error; the run must abort.
    #[error("fatal error in {operation}: {message}")]
    Fatal { operation: String, message: String },

    /// Configuration could not be loaded or was invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error. `pipeline-core` does not depend on `sqlx` directly
    /// (it is a leaf crate many others depend on transitively), so callers
    /// convert with `.to_string()` at the boundary.
    #[error("database error: {0}")]
    Database(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification used to decide whether a failed operation should be
/// retried. Mirrors the transient/deterministic/fatal split in the
/// error handling design, generalized from string sniffing to matching
/// on the structured [`PipelineError`] variant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed if retried (broker reconnect, LLM 503, DB deadlock).
    Transient,
    /// Will not succeed on retry (schema violation, malformed contract).
    Deterministic,
    /// Aborts the run entirely.
    Fatal,
}

/// Classify an error for retry/DLQ routing.
pub fn classify_error(error: &PipelineError) -> ErrorClass {
    match error {
        PipelineError::Transient { .. } => ErrorClass::Transient,
        PipelineError::Contract { .. } => ErrorClass::Deterministic,
        PipelineError::Fatal { .. } => ErrorClass::Fatal,
        PipelineError::Partial { .. } => ErrorClass::Transient,
        PipelineError::Config(_) => ErrorClass::Fatal,
        PipelineError::Database(msg) => classify_message(msg),
        PipelineError::Serialization(_) => ErrorClass::Deterministic,
        PipelineError::Io(_) => ErrorClass::Transient,
    }
}

/// Fallback classification for errors that only arrive as opaque
/// strings, e.g. from the external `PromptRunner`/`GraphSink`
/// collaborators. Kept separate from `classify_error` so the
/// string-matching heuristics never shadow structured variants.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("deadlock")
        || lower.contains("unavailable")
        || lower.contains("reset")
    {
        return ErrorClass::Transient;
    }
    if lower.contains("corrupt") || lower.contains("auth") {
        return ErrorClass::Fatal;
    }
    ErrorClass::Deterministic
}

impl PipelineError {
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn contract(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Contract {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn partial(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Partial {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
