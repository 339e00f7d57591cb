//! Configuration for the remote LLM collaborator.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a remote LLM endpoint (any OpenAI-chat-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_key: String,

    /// Examples: "https://api.openai.com/v1", "https://api.anthropic.com".
    pub base_url: String,

    pub model: String,

    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    pub organization: Option<String>,
}

impl RemoteLlmConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            organization: None,
        }
    }

    pub fn from_env(env_var: &str, base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(format!("environment variable: {env_var}")))?;
        Ok(Self::new(api_key, base_url, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_config_builder_sets_fields() {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4")
            .with_timeout(Duration::from_secs(120))
            .with_organization("org-123");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.organization, Some("org-123".to_string()));
    }

    #[test]
    fn from_env_reads_api_key() {
        std::env::set_var("LLM_TEST_KEY_CONFIG", "secret");
        let config = RemoteLlmConfig::from_env("LLM_TEST_KEY_CONFIG", "https://example.test", "gpt-4").unwrap();
        assert_eq!(config.api_key, "secret");
        std::env::remove_var("LLM_TEST_KEY_CONFIG");
    }
}
