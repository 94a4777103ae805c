//! Provider adapter abstraction.
//!
//! Each external text-generation backend implements [`ProviderAdapter`],
//! giving the unified client one interface for sending a
//! (system prompt, user prompt) pair and counting tokens.

use super::error::ProviderError;
use super::tokens::estimate_tokens;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of rate-limit retries before an analyze call gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// The supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Claude,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    /// Parses a provider name as supplied by configuration or a caller.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "openai" => Some(ProviderKind::OpenAi),
            "claude" => Some(ProviderKind::Claude),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token accounting reported by a provider, when it reports any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// One completed analysis call.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Raw text of the model reply.
    pub content: String,
    /// Backend that produced it.
    pub provider: ProviderKind,
    /// Concrete model name used for the call.
    pub model: String,
    /// Token usage, absent for providers that do not report it.
    pub usage: Option<TokenUsage>,
}

/// A single external text-generation backend.
///
/// Implementations make exactly one outbound call per attempt and retry
/// internally on rate-limit signals; any other failure is returned as-is.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Sends one (system prompt, user prompt) pair, retrying up to
    /// `max_retries` times on rate-limit errors.
    async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_retries: u32,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Counts the tokens in `text`. Never fails: backends without native
    /// counting use the shared character estimate.
    async fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn kind(&self) -> ProviderKind;

    fn model(&self) -> &str;
}
