//! Configuration management.
//!
//! Settings load from `THEMATA_*` environment variables with sensible
//! defaults; provider credentials are read separately (see
//! [`crate::provider::Credentials`]) so the configuration itself never
//! holds secrets.
//!
//! # Environment Variables
//!
//! - `THEMATA_PROVIDER`: default provider (gemini|openai|claude) - optional
//! - `THEMATA_MODEL`: model override applied to every adapter - optional
//! - `THEMATA_REQUEST_TIMEOUT`: per-request timeout in seconds - default: "120"
//! - `THEMATA_MAX_RETRIES`: rate-limit retries per call - default: "5"
//! - `THEMATA_LOG_LEVEL`: logging level - default: "info"

use crate::provider::{ClientOptions, ProviderKind, DEFAULT_MAX_RETRIES};
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid provider: {0}. Valid options: gemini, openai, claude")]
    InvalidProvider(String),

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Explicit default provider; the credential priority order applies
    /// when unset.
    pub default_provider: Option<ProviderKind>,

    /// Model override for every configured adapter.
    pub model: Option<String>,

    pub request_timeout_secs: u64,

    pub max_retries: u32,

    pub log_level: String,
}

impl Default for EngineConfig {
    /// Loads configuration from environment variables with defaults.
    fn default() -> Self {
        let default_provider = env::var("THEMATA_PROVIDER")
            .ok()
            .and_then(|name| ProviderKind::parse(&name));

        let model = env::var("THEMATA_MODEL").ok().filter(|m| !m.is_empty());

        let request_timeout_secs = env::var("THEMATA_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let max_retries = env::var("THEMATA_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);

        let log_level = env::var("THEMATA_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            default_provider,
            model,
            request_timeout_secs,
            max_retries,
            log_level,
        }
    }
}

impl EngineConfig {
    /// Validates numeric ranges and the log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "request timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "request timeout cannot exceed 10 minutes".to_string(),
            ));
        }

        if self.max_retries > 20 {
            return Err(ConfigError::ValidationFailed(
                "more than 20 rate-limit retries is never useful".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::ValidationFailed(format!(
                "invalid log level: {other}. Valid options: trace, debug, info, warn, error"
            ))),
        }
    }

    /// Construction options for the unified client.
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            default_provider: self.default_provider,
            model: self.model.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
        }
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Themata Configuration:")?;
        match self.default_provider {
            Some(provider) => writeln!(f, "  Default Provider: {provider}")?,
            None => writeln!(f, "  Default Provider: (credential priority)")?,
        }
        if let Some(model) = &self.model {
            writeln!(f, "  Model: {model}")?;
        }
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Max Retries: {}", self.max_retries)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Temporarily sets an environment variable for one test.
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn environment_variables_are_honored() {
        let _guards = vec![
            EnvGuard::set("THEMATA_PROVIDER", "claude"),
            EnvGuard::set("THEMATA_MODEL", "claude-sonnet-4-20250514"),
            EnvGuard::set("THEMATA_REQUEST_TIMEOUT", "60"),
            EnvGuard::set("THEMATA_MAX_RETRIES", "3"),
            EnvGuard::set("THEMATA_LOG_LEVEL", "debug"),
        ];

        let config = EngineConfig::default();
        assert_eq!(config.default_provider, Some(ProviderKind::Claude));
        assert_eq!(config.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(config.request_timeout_secs, 60);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_provider_falls_back_to_priority_order() {
        let _guard = EnvGuard::set("THEMATA_PROVIDER", "abacus");
        let config = EngineConfig::default();
        assert_eq!(config.default_provider, None);
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let config = EngineConfig {
            request_timeout_secs: 0,
            ..sane_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_log_level_fails_validation() {
        let config = EngineConfig {
            log_level: "loud".to_string(),
            ..sane_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_options_carry_the_settings_over() {
        let config = EngineConfig {
            default_provider: Some(ProviderKind::OpenAi),
            model: Some("gpt-4o".to_string()),
            request_timeout_secs: 45,
            max_retries: 2,
            log_level: "info".to_string(),
        };
        let options = config.client_options();
        assert_eq!(options.default_provider, Some(ProviderKind::OpenAi));
        assert_eq!(options.model.as_deref(), Some("gpt-4o"));
        assert_eq!(options.timeout, Duration::from_secs(45));
        assert_eq!(options.max_retries, 2);
    }

    fn sane_config() -> EngineConfig {
        EngineConfig {
            default_provider: None,
            model: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}
