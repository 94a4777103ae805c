//! Multi-provider text-generation client.
//!
//! Three capability-equivalent HTTP adapters (Gemini, OpenAI, Claude)
//! behind one trait, a unified client that picks among the configured
//! ones, shared rate-limit retry, and best-effort reply parsing.

pub mod adapter;
pub mod claude;
pub mod client;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod response;
pub mod retry;
pub mod tokens;

pub use adapter::{ProviderAdapter, ProviderKind, ProviderResponse, TokenUsage, DEFAULT_MAX_RETRIES};
pub use claude::ClaudeAdapter;
pub use client::{provider_for_model, AnalyzeOptions, ClientError, ClientOptions, Credentials, UnifiedClient};
pub use error::ProviderError;
pub use gemini::GeminiAdapter;
pub use mock::{MockAdapter, MockReply};
pub use openai::OpenAiAdapter;
pub use response::{extract_json_object, normalize_values, parse_mapping};
pub use retry::Backoff;
pub use tokens::estimate_tokens;
