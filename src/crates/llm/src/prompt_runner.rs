//! The external LLM collaborator contract: hand it a prompt, get back
//! a raw text completion for the worker's sanitizer/parser to decode.

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Runs a single prompt against an LLM and returns its raw text
/// completion. Deliberately untyped on the response: the worker owns
/// sanitizing and schema-validating whatever JSON comes back, since a
/// model's output is never trusted as well-formed on the first try.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Reference implementation against any OpenAI-chat-completions-shaped
/// endpoint (OpenAI itself, and most self-hosted gateways in front of
/// other providers).
#[derive(Clone)]
pub struct OpenAiCompatibleRunner {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiCompatibleRunner {
    pub fn new(config: RemoteLlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }
}

#[async_trait]
impl PromptRunner for OpenAiCompatibleRunner {
    async fn run(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage { role: "system", content: system_prompt.to_string() },
                ChatMessage { role: "user", content: user_prompt.to_string() },
            ],
            temperature: 0.0,
        };

        let mut req = self.client.post(&url).json(&body);
        req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await.map_err(LlmError::HttpError)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationError(body),
                429 => LlmError::RateLimitExceeded(body),
                503 => LlmError::ServiceUnavailable(body),
                _ => LlmError::ProviderError(format!("{status}: {body}")),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in completion".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runner_can_be_constructed_from_config() {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4o");
        let _runner = OpenAiCompatibleRunner::new(config);
    }
}
