//! Shared types, errors, configuration, and run context for the
//! distributed code-knowledge-graph analysis pipeline.
//!
//! This crate has no async runtime or I/O dependencies of its own beyond
//! what the types require (`chrono`, `sha2`) so every other pipeline
//! crate can depend on it without pulling in `sqlx` or `tokio` net
//! features transitively.

pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod model;

pub use config::PipelineConfig;
pub use context::RunContext;
pub use error::{classify_error, classify_message, ErrorClass, PipelineError, Result};
