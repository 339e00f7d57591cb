//! Pipeline configuration: compiled-in non-secret defaults, overlaid with
//! environment variables. Secrets (broker credentials, graph-sink auth,
//! LLM API key) come from the environment only and are never part of
//! the on-disk defaults or persisted back to a config file.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Full pipeline configuration, enumerated per the external interfaces
/// contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub target_directory: String,
    #[serde(default = "default_glob_patterns")]
    pub glob_patterns: Vec<String>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,
    #[serde(default = "default_prompt_overhead")]
    pub prompt_overhead: usize,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_job_max_attempts")]
    pub job_max_attempts: u32,
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default = "default_validate_threshold")]
    pub validate_threshold: f64,
    #[serde(default = "default_discard_threshold")]
    pub discard_threshold: f64,

    /// SQLite path. Not a secret, but may be overridden via env.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Broker (Redis) URL. Must come from the environment in production;
    /// the default here only supports local development.
    #[serde(skip_serializing, default = "default_broker_url")]
    pub broker_url: String,

    /// Graph sink connection URL. Secret-bearing; environment only.
    #[serde(skip_serializing, default)]
    pub graph_sink_url: Option<String>,

    /// LLM endpoint. Secret-bearing; environment only.
    #[serde(skip_serializing, default)]
    pub llm_url: Option<String>,
}

fn default_glob_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}
fn default_max_tokens_per_batch() -> usize {
    65_000
}
fn default_prompt_overhead() -> usize {
    1_000
}
fn default_worker_concurrency() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_job_max_attempts() -> u32 {
    3
}
fn default_lock_ttl_ms() -> u64 {
    600_000
}
fn default_validate_threshold() -> f64 {
    0.65
}
fn default_discard_threshold() -> f64 {
    0.35
}
fn default_db_path() -> String {
    "pipeline.db".to_string()
}
fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_directory: ".".to_string(),
            glob_patterns: default_glob_patterns(),
            ignore_patterns: Vec::new(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            prompt_overhead: default_prompt_overhead(),
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            job_max_attempts: default_job_max_attempts(),
            lock_ttl_ms: default_lock_ttl_ms(),
            validate_threshold: default_validate_threshold(),
            discard_threshold: default_discard_threshold(),
            db_path: default_db_path(),
            broker_url: default_broker_url(),
            graph_sink_url: None,
            llm_url: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file, then overlay
    /// `PIPELINE__*`-prefixed environment variables (double underscore
    /// separates nesting; flat here since the config is flat).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| PipelineError::Config(format!("invalid config at {:?}: {}", path, e)))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment-variable overrides onto an in-memory config,
    /// without touching disk. Secrets are read here exclusively.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PIPELINE__TARGET_DIRECTORY") {
            self.target_directory = v;
        }
        if let Ok(v) = get_env_parse::<usize>("PIPELINE__MAX_TOKENS_PER_BATCH") {
            self.max_tokens_per_batch = v;
        }
        if let Ok(v) = get_env_parse::<usize>("PIPELINE__WORKER_CONCURRENCY") {
            self.worker_concurrency = v;
        }
        if let Ok(v) = get_env_parse::<f64>("PIPELINE__VALIDATE_THRESHOLD") {
            self.validate_threshold = v;
        }
        if let Ok(v) = get_env_parse::<f64>("PIPELINE__DISCARD_THRESHOLD") {
            self.discard_threshold = v;
        }
        if let Ok(v) = std::env::var("PIPELINE__DB_PATH") {
            self.db_path = v;
        }
        // Secrets: environment only, never read from the TOML file above.
        if let Ok(v) = std::env::var("PIPELINE_BROKER_URL") {
            self.broker_url = v;
        }
        if let Ok(v) = std::env::var("PIPELINE_GRAPH_SINK_URL") {
            self.graph_sink_url = Some(v);
        }
        if let Ok(v) = std::env::var("PIPELINE_LLM_URL") {
            self.llm_url = Some(v);
        }
    }

    /// Validate cross-field invariants (thresholds ordered, overhead fits
    /// within the batch budget).
    pub fn validate(&self) -> Result<()> {
        if self.discard_threshold >= self.validate_threshold {
            return Err(PipelineError::Config(format!(
                "discard_threshold ({}) must be less than validate_threshold ({})",
                self.discard_threshold, self.validate_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.discard_threshold) || !(0.0..=1.0).contains(&self.validate_threshold) {
            return Err(PipelineError::Config(
                "thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if self.prompt_overhead >= self.max_tokens_per_batch {
            return Err(PipelineError::Config(
                "prompt_overhead must be smaller than max_tokens_per_batch".to_string(),
            ));
        }
        Ok(())
    }

    /// Token budget available for file content in a batch, after
    /// reserving the prompt overhead.
    pub fn effective_token_budget(&self) -> usize {
        self.max_tokens_per_batch.saturating_sub(self.prompt_overhead)
    }
}

fn get_env_parse<T: std::str::FromStr>(key: &str) -> std::result::Result<T, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut cfg = PipelineConfig::default();
        cfg.validate_threshold = 0.3;
        cfg.discard_threshold = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn effective_budget_subtracts_overhead() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.effective_token_budget(), 64_000);
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        std::env::set_var("PIPELINE__WORKER_CONCURRENCY", "9");
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.worker_concurrency, 9);
        std::env::remove_var("PIPELINE__WORKER_CONCURRENCY");
    }
}
