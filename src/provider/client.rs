//! Unified client over the configured provider adapters.
//!
//! Constructed once from the credential set; callers pick a provider by
//! name, by model naming convention, or fall through to the configured
//! default. The model-name routing rule lives here and nowhere else.

use super::adapter::{ProviderAdapter, ProviderKind, ProviderResponse, DEFAULT_MAX_RETRIES};
use super::claude::ClaudeAdapter;
use super::error::ProviderError;
use super::gemini::GeminiAdapter;
use super::openai::OpenAiAdapter;
use super::tokens::estimate_tokens;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Preference order when no default provider is configured explicitly.
const PRIORITY: [ProviderKind; 3] = [
    ProviderKind::Gemini,
    ProviderKind::OpenAi,
    ProviderKind::Claude,
];

/// API keys available to this process, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
}

impl Credentials {
    /// Reads keys from the standard environment variables.
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: env::var("GEMINI_API_KEY")
                .or_else(|_| env::var("GOOGLE_API_KEY"))
                .ok(),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gemini_api_key.is_none()
            && self.openai_api_key.is_none()
            && self.anthropic_api_key.is_none()
    }
}

/// Construction-time options for the unified client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Explicit default provider; when absent the priority order decides.
    pub default_provider: Option<ProviderKind>,
    /// Model override applied to every adapter that gets built.
    pub model: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_provider: None,
            model: None,
            timeout: Duration::from_secs(120),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Per-call provider selection.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Provider requested by name; wins over the model convention.
    pub provider: Option<String>,
    /// Model name; routed through [`provider_for_model`] when no provider
    /// name is given.
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(
        "no text-generation provider is configured; \
         set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY"
    )]
    NoProvidersConfigured,

    #[error("default provider {0} is not configured")]
    DefaultNotConfigured(ProviderKind),
}

/// Routes a model name to the provider whose naming convention it follows.
///
/// This is the single place the convention is encoded: OpenAI models start
/// with `gpt-` (or the `o`-series prefix), Claude models with `claude`,
/// and everything else goes to Gemini.
pub fn provider_for_model(model: &str) -> ProviderKind {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gpt-") || lower.starts_with("o1") || lower.starts_with("o3") {
        ProviderKind::OpenAi
    } else if lower.starts_with("claude") {
        ProviderKind::Claude
    } else {
        ProviderKind::Gemini
    }
}

pub struct UnifiedClient {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    default: ProviderKind,
    max_retries: u32,
}

impl UnifiedClient {
    /// Builds adapters for every credentialed provider.
    ///
    /// Fails when no provider is configured, or when an explicitly
    /// requested default lacks credentials.
    pub fn from_credentials(
        credentials: &Credentials,
        options: &ClientOptions,
    ) -> Result<Self, ClientError> {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

        if let Some(key) = &credentials.gemini_api_key {
            adapters.insert(
                ProviderKind::Gemini,
                Arc::new(GeminiAdapter::new(key.clone(), options.model.clone())),
            );
        }
        if let Some(key) = &credentials.openai_api_key {
            adapters.insert(
                ProviderKind::OpenAi,
                Arc::new(OpenAiAdapter::new(key.clone(), options.model.clone())),
            );
        }
        if let Some(key) = &credentials.anthropic_api_key {
            adapters.insert(
                ProviderKind::Claude,
                Arc::new(ClaudeAdapter::new(key.clone(), options.model.clone())),
            );
        }

        Self::assemble(adapters, options.default_provider, options.max_retries)
    }

    /// Builds a client from pre-constructed adapters.
    pub fn from_adapters(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        default_provider: Option<ProviderKind>,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        let map = adapters
            .into_iter()
            .map(|adapter| (adapter.kind(), adapter))
            .collect();
        Self::assemble(map, default_provider, max_retries)
    }

    fn assemble(
        adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
        default_provider: Option<ProviderKind>,
        max_retries: u32,
    ) -> Result<Self, ClientError> {
        if adapters.is_empty() {
            return Err(ClientError::NoProvidersConfigured);
        }

        let default = match default_provider {
            Some(kind) if adapters.contains_key(&kind) => kind,
            Some(kind) => return Err(ClientError::DefaultNotConfigured(kind)),
            None => PRIORITY
                .iter()
                .copied()
                .find(|kind| adapters.contains_key(kind))
                .expect("non-empty adapter set contains a priority provider"),
        };

        info!(default = %default, configured = adapters.len(), "unified client ready");

        Ok(Self {
            adapters,
            default,
            max_retries,
        })
    }

    /// Pure query: is the named provider configured?
    pub fn has_provider(&self, name: &str) -> bool {
        ProviderKind::parse(name)
            .map(|kind| self.adapters.contains_key(&kind))
            .unwrap_or(false)
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default
    }

    /// Dispatches one analysis call to the requested or default adapter.
    pub async fn analyze(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &AnalyzeOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        let adapter = self.resolve(options)?;
        adapter
            .analyze(system_prompt, user_prompt, self.max_retries)
            .await
    }

    /// Counts tokens with the requested or default adapter.
    ///
    /// Never fails: an unresolvable provider falls back to the character
    /// estimate, matching the adapters' own fallback behavior.
    pub async fn count_tokens(&self, text: &str, options: &AnalyzeOptions) -> usize {
        match self.resolve(options) {
            Ok(adapter) => adapter.count_tokens(text).await,
            Err(_) => estimate_tokens(text),
        }
    }

    fn resolve(&self, options: &AnalyzeOptions) -> Result<&Arc<dyn ProviderAdapter>, ProviderError> {
        let kind = if let Some(name) = &options.provider {
            ProviderKind::parse(name)
                .ok_or_else(|| ProviderError::UnknownProvider(name.clone()))?
        } else if let Some(model) = &options.model {
            provider_for_model(model)
        } else {
            self.default
        };

        self.adapters
            .get(&kind)
            .ok_or_else(|| ProviderError::NotConfigured(kind.to_string()))
    }
}
