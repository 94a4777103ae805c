//! Anthropic Claude messages adapter.

use super::adapter::{ProviderAdapter, ProviderKind, ProviderResponse, TokenUsage};
use super::error::{looks_rate_limited, ProviderError};
use super::retry::{run_with_backoff, Backoff};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

const TEMPERATURE: f32 = 1.0;
const COMPLETION_LEN: u32 = 2000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const BACKOFF_SECS: u64 = 60;

pub struct ClaudeAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    http: Client,
    timeout: Duration,
}

impl ClaudeAdapter {
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
    ) -> Result<MessagesResponse, ProviderError> {
        let url = format!("{}/messages", self.endpoint);
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: COMPLETION_LEN,
            temperature: TEMPERATURE,
            system: system_prompt.to_string(),
            messages: vec![UserMessage {
                role: "user".to_string(),
                content: user_prompt.to_string(),
            }],
        };

        debug!(model = %self.model, "sending request to Claude");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
            .json::<MessagesResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
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
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        let content = response
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "reply carried no text blocks".into(),
            ));
        }

        Ok(ProviderResponse {
            content,
            provider: ProviderKind::Claude,
            model: self.model.clone(),
            usage,
        })
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<UserMessage>,
}

#[derive(Debug, Serialize)]
struct UserMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tokens::estimate_tokens;

    #[test]
    fn constructor_uses_default_model() {
        let adapter = ClaudeAdapter::new("key", None);
        assert_eq!(adapter.model(), DEFAULT_MODEL);
        assert_eq!(adapter.kind(), ProviderKind::Claude);
    }

    #[tokio::test]
    async fn token_counting_falls_back_to_the_estimate() {
        let adapter = ClaudeAdapter::new("key", None);
        let text = "claude has no separate counting endpoint";
        assert_eq!(adapter.count_tokens(text).await, estimate_tokens(text));
    }

    #[test]
    fn messages_response_parses_with_usage() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{
                "content": [{ "type": "text", "text": "{\"1\": \"x\"}" }],
                "usage": { "input_tokens": 15, "output_tokens": 4 }
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.content.len(), 1);
        assert_eq!(parsed.usage.unwrap().output_tokens, Some(4));
    }
}
