//! Generative completion collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_embeddings::RetryPolicy;
use tracing::debug;

use crate::error::CompletionError;

/// Produces text for a prompt.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Model identifier.
    fn model(&self) -> &str;

    /// Largest prompt body, in characters, the model should be given.
    fn input_limit_chars(&self) -> usize {
        24_000
    }

    /// Complete `prompt`; the provider may truncate at `max_output_tokens`.
    async fn complete(&self, prompt: &str, max_output_tokens: u32)
    -> Result<String, CompletionError>;
}

/// Settings for [`OpenAiCompletion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiCompletionConfig {
    /// API key; falls back to `OPENAI_API_KEY` when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,

    /// Chat model.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Prompt size limit reported through [`Completion::input_limit_chars`].
    pub input_limit_chars: usize,

    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for OpenAiCompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 60,
            input_limit_chars: 24_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiCompletion {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: f32,
    input_limit_chars: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAiCompletion {
    pub fn new(config: OpenAiCompletionConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let api_key = config
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty());
        Ok(Self {
            api_key,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model,
            temperature: config.temperature,
            input_limit_chars: config.input_limit_chars.max(1),
            retry: config.retry,
            client,
        })
    }

    /// Whether an API key is available.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn request(&self, prompt: &str, max_tokens: u32) -> Result<String, CompletionError> {
        let api_key = self.api_key.as_ref().ok_or(CompletionError::NotConfigured)?;
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(CompletionError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            let message = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(CompletionError::ApiRequest {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::InvalidResponse("no choices in response".to_string()))
    }
}

#[async_trait]
impl Completion for OpenAiCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    fn input_limit_chars(&self) -> usize {
        self.input_limit_chars
    }

    async fn complete(
        &self,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, CompletionError> {
        debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            max_output_tokens,
            "requesting completion"
        );
        self.retry
            .run("completion", CompletionError::is_retryable, || {
                self.request(prompt, max_output_tokens)
            })
            .await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
