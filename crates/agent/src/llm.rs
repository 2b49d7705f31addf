//! The completion oracle seam and its OpenAI-compatible HTTP client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use chatcart_core::config::LlmConfig;
use chatcart_core::ChatTurn;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion endpoint returned status {0}")]
    Status(u16),
    #[error("completion response was malformed: {0}")]
    Malformed(String),
}

/// Opaque text-completion oracle: role-tagged messages in, text out.
/// Treated as fallible and untrusted; callers own all parsing.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        temperature: f32,
    ) -> Result<String, CompletionError>;
}

pub struct OpenAiCompletionClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompletionClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    fn backoff(attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let delay_ms = 250_u64.saturating_mul(1 << exponent).min(5_000);
        Duration::from_millis(delay_ms)
    }

    async fn request_once(
        &self,
        messages: &[ChatTurn],
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let body = ApiRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|turn| ApiMessage { role: turn.role.as_str(), content: &turn.content })
                .collect(),
            temperature,
        };

        let mut request = self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|err| CompletionError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CompletionError::Status(status.as_u16()));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Malformed(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CompletionError::Malformed("response carried no choices".to_string()))
    }

    fn is_retryable(error: &CompletionError) -> bool {
        match error {
            CompletionError::Transport(_) => true,
            CompletionError::Status(code) => *code == 429 || *code >= 500,
            CompletionError::Malformed(_) => false,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let mut attempt = 0;
        loop {
            match self.request_once(messages, temperature).await {
                Ok(text) => return Ok(text),
                Err(error) if Self::is_retryable(&error) && attempt < self.max_retries => {
                    warn!(attempt, %error, "completion request failed; retrying");
                    tokio::time::sleep(Self::backoff(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Deterministic oracle double: pops pre-scripted replies in order and fails
/// once the script runs dry. Mirrors the role a noop transport plays for the
/// real network client.
#[derive(Default)]
pub struct ScriptedCompletionClient {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedCompletionClient {
    pub fn new(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { replies: Mutex::new(replies.into_iter().map(Into::into).collect()) }
    }

    pub async fn push(&self, reply: impl Into<String>) {
        self.replies.lock().await.push_back(reply.into());
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(
        &self,
        _messages: &[ChatTurn],
        _temperature: f32,
    ) -> Result<String, CompletionError> {
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| CompletionError::Transport("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionClient, CompletionError, OpenAiCompletionClient, ScriptedCompletionClient};

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(OpenAiCompletionClient::backoff(0).as_millis(), 250);
        assert_eq!(OpenAiCompletionClient::backoff(1).as_millis(), 500);
        assert_eq!(OpenAiCompletionClient::backoff(10).as_millis(), 5_000);
    }

    #[test]
    fn retry_classification_matches_policy() {
        assert!(OpenAiCompletionClient::is_retryable(&CompletionError::Transport("t".into())));
        assert!(OpenAiCompletionClient::is_retryable(&CompletionError::Status(429)));
        assert!(OpenAiCompletionClient::is_retryable(&CompletionError::Status(503)));
        assert!(!OpenAiCompletionClient::is_retryable(&CompletionError::Status(401)));
        assert!(!OpenAiCompletionClient::is_retryable(&CompletionError::Malformed("m".into())));
    }

    #[tokio::test]
    async fn scripted_client_pops_in_order_then_fails() {
        let client = ScriptedCompletionClient::new(["first", "second"]);
        assert_eq!(client.complete(&[], 0.0).await.unwrap(), "first");
        assert_eq!(client.complete(&[], 0.0).await.unwrap(), "second");
        assert!(client.complete(&[], 0.0).await.is_err());
    }
}
