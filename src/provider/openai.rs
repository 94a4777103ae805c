//! OpenAI chat-completions adapter.

use super::adapter::{ProviderAdapter, ProviderKind, ProviderResponse, TokenUsage};
use super::error::{looks_rate_limited, ProviderError};
use super::retry::{run_with_backoff, Backoff};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

const TEMPERATURE: f32 = 1.0;
const TOP_P: f32 = 1.0;
const COMPLETION_LEN: u32 = 2000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// OpenAI rate limits recover on a fixed one-minute window.
const BACKOFF_SECS: u64 = 60;

pub struct OpenAiAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    http: Client,
    timeout: Duration,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self::with_endpoint(
            api_key,
            model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            DEFAULT_ENDPOINT.to_string(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: String,
        endpoint: String,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            api_key: api_key.into(),
            model,
            endpoint,
            http,
            timeout,
        }
    }

    async fn request_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<ChatCompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: COMPLETION_LEN,
            top_p: TOP_P,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        };

        debug!(model = %self.model, "sending request to OpenAI");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout.as_secs())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = text.trim().chars().take(300).collect::<String>();
            return Err(if status.as_u16() == 429 || looks_rate_limited(&text) {
                ProviderError::RateLimited(message)
            } else if status.as_u16() == 401 {
                ProviderError::Auth(message)
            } else {
                ProviderError::Api {
                    message,
                    status: Some(status.as_u16()),
                }
            });
        }

        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let backoff = Backoff::Fixed(Duration::from_secs(BACKOFF_SECS));
        let response = run_with_backoff(max_retries, backoff, || {
            self.request_once(system_prompt, user_prompt)
        })
        .await?;

        let usage = response.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("reply carried no choices".into()))?;

        Ok(ProviderResponse {
            content,
            provider: ProviderKind::OpenAi,
            model: self.model.clone(),
            usage,
        })
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}
