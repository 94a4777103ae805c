//! Error types for text-generation providers.

use thiserror::Error;

/// Errors produced by provider adapters and the unified client.
///
/// Only [`ProviderError::RateLimited`] is retried; every other variant is
/// terminal for the call that produced it.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// API request was rejected with a non-success status.
    #[error("API error: {message}")]
    Api {
        message: String,
        status: Option<u16>,
    },

    /// Authentication failed or credentials are invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Request timed out after the specified number of seconds.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit or quota exhaustion reported by the provider.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// Rate-limit retries were exhausted without a successful call.
    #[error("abandoned after {attempts} futile attempts due to rate limiting")]
    RetriesExhausted { attempts: u32 },

    /// The provider refused to complete the reply (safety filters,
    /// recitation concerns, or an unnamed block).
    #[error("response blocked by provider: {0}")]
    Blocked(String),

    /// The reply arrived but did not have the expected shape.
    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    /// Connection-level failure before any reply arrived.
    #[error("network error: {0}")]
    Network(String),

    /// A provider was requested by name but has no credentials configured.
    #[error("provider {0} is not configured")]
    NotConfigured(String),

    /// A provider name that the client does not recognize at all.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// True for the one transient variant that backoff-and-retry applies to.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Shared heuristic for spotting rate-limit conditions in error bodies.
///
/// Providers phrase quota exhaustion differently; all three of them include
/// one of these markers somewhere in the message.
pub fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("quota")
        || lower.contains("resource_exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_is_case_insensitive() {
        assert!(looks_rate_limited("Rate Limit exceeded"));
        assert!(looks_rate_limited("You have run out of QUOTA"));
        assert!(looks_rate_limited("code: RESOURCE_EXHAUSTED"));
        assert!(!looks_rate_limited("invalid api key"));
    }

    #[test]
    fn only_rate_limited_is_transient() {
        assert!(ProviderError::RateLimited("429".into()).is_rate_limit());
        assert!(!ProviderError::Auth("bad key".into()).is_rate_limit());
        assert!(!ProviderError::RetriesExhausted { attempts: 5 }.is_rate_limit());
    }

    #[test]
    fn exhausted_error_names_the_attempt_count() {
        let err = ProviderError::RetriesExhausted { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }
}
