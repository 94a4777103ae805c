//! Gemini HTTP adapter.
//!
//! Talks to the `generativelanguage` REST API directly. Gemini is the one
//! backend with native token counting (`:countTokens`); it also reports a
//! finish reason that must be checked, because crime narratives trip its
//! safety filters unless they are relaxed per-request.

use super::adapter::{ProviderAdapter, ProviderKind, ProviderResponse, TokenUsage};
use super::error::{looks_rate_limited, ProviderError};
use super::retry::{run_with_backoff, Backoff};
use super::tokens::estimate_tokens;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const TEMPERATURE: f32 = 1.0;
const TOP_P: f32 = 1.0;
const COMPLETION_LEN: u32 = 2000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Backoff grows with each consecutive rate limit; Gemini quota windows
/// recover on variable schedules.
const BACKOFF_STEP_SECS: u64 = 30;

/// Texts shorter than this skip the counting endpoint entirely.
const MIN_COUNT_LEN: usize = 20;

pub struct GeminiAdapter {
    api_key: String,
    model: String,
    endpoint: String,
    http: Client,
    timeout: Duration,
}

impl GeminiAdapter {
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
    ) -> Result<GenerateContentResponse, ProviderError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.model, self.api_key
        );

        // Crime-report narratives describe harassment and violence; every
        // harm category has to be unblocked for the analysis to run at all.
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": user_prompt }] }],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "maxOutputTokens": COMPLETION_LEN,
                "topP": TOP_P,
            },
            "safetySettings": [
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE" },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE" },
            ],
        });

        debug!(model = %self.model, "sending request to Gemini");

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    fn extract_content(response: GenerateContentResponse) -> Result<(String, Option<TokenUsage>), ProviderError> {
        let usage = response.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        });

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("reply carried no candidates".into()))?;

        match candidate.finish_reason.as_deref() {
            Some("SAFETY") => {
                return Err(ProviderError::Blocked(
                    "response blocked by safety filters".into(),
                ))
            }
            Some("RECITATION") => {
                return Err(ProviderError::Blocked(
                    "response blocked due to recitation concerns".into(),
                ))
            }
            Some("OTHER") => {
                return Err(ProviderError::Blocked(
                    "response blocked for unknown reasons".into(),
                ))
            }
            _ => {}
        }

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "candidate carried no text content".into(),
            ));
        }

        Ok((content, usage))
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries: u32,
    ) -> Result<ProviderResponse, ProviderError> {
        let backoff = Backoff::Linear(Duration::from_secs(BACKOFF_STEP_SECS));
        let response = run_with_backoff(max_retries, backoff, || {
            self.request_once(system_prompt, user_prompt)
        })
        .await?;

        let (content, usage) = Self::extract_content(response)?;

        Ok(ProviderResponse {
            content,
            provider: ProviderKind::Gemini,
            model: self.model.clone(),
            usage,
        })
    }

    async fn count_tokens(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        if text.len() < MIN_COUNT_LEN {
            return estimate_tokens(text);
        }

        let url = format!(
            "{}/models/{}:countTokens?key={}",
            self.endpoint, self.model, self.api_key
        );
        let body = json!({ "contents": [{ "parts": [{ "text": text }] }] });

        let counted = async {
            let response = self.http.post(&url).json(&body).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            let parsed = response.json::<CountTokensResponse>().await.ok()?;
            parsed.total_tokens
        }
        .await;

        match counted {
            Some(total) => total as usize,
            None => {
                warn!("native token counting failed, using character estimate");
                estimate_tokens(text)
            }
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn classify_api_error(status: u16, body: &str) -> ProviderError {
    let message = body.trim().chars().take(300).collect::<String>();
    if status == 429 || looks_rate_limited(body) {
        ProviderError::RateLimited(message)
    } else if status == 401 || status == 403 {
        ProviderError::Auth(message)
    } else {
        ProviderError::Api {
            message,
            status: Some(status),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CountTokensResponse {
    #[serde(rename = "totalTokens")]
    total_tokens: Option<u64>,
}
