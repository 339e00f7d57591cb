//! The external LLM collaborator contract used by the analysis workers.
//!
//! The pipeline treats an LLM provider as an untrusted collaborator
//! behind a single narrow boundary: [`PromptRunner::run`] takes a
//! system and user prompt and returns whatever text came back. Workers
//! own everything downstream of that call — sanitizing, schema
//! validation, and retry classification — because a model completion
//! is never assumed well-formed.

pub mod config;
pub mod error;
pub mod prompt_runner;

pub use config::RemoteLlmConfig;
pub use error::{LlmError, Result};
pub use prompt_runner::{OpenAiCompatibleRunner, PromptRunner};
