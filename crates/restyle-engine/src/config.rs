use std::env;
use std::time::Duration;

use restyle_contracts::generation::RetryPolicy;
use restyle_contracts::providers::ProviderId;

use crate::preprocess::DEFAULT_MAX_INLINE_CHARS;

pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_X_TITLE: &str = "Clothing Switcher App";

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 120.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;
const MAX_RETRY_BACKOFF_S: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRouterConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub http_referer: Option<String>,
    pub x_title: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_OPENROUTER_API_BASE.to_string(),
            http_referer: None,
            x_title: DEFAULT_X_TITLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub api_base: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
        }
    }
}

/// Everything the engine reads from the environment, resolved once.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub openrouter: OpenRouterConfig,
    pub gemini: GeminiConfig,
    pub openrouter_retry: RetryPolicy,
    pub gemini_retry: RetryPolicy,
    /// Per-image base64 budget.
    pub max_inline_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S);
        Self {
            openrouter: OpenRouterConfig::default(),
            gemini: GeminiConfig::default(),
            openrouter_retry: default_retry_policy(ProviderId::OpenRouter, timeout),
            gemini_retry: default_retry_policy(ProviderId::Gemini, timeout),
            max_inline_chars: DEFAULT_MAX_INLINE_CHARS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from an arbitrary key lookup. Values are trimmed;
    /// blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let openrouter = OpenRouterConfig {
            api_key: get("OPENROUTER_API_KEY"),
            api_base: get("OPENROUTER_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENROUTER_API_BASE.to_string()),
            http_referer: get("OPENROUTER_HTTP_REFERER"),
            x_title: get("OPENROUTER_X_TITLE").unwrap_or_else(|| DEFAULT_X_TITLE.to_string()),
        };
        let gemini = GeminiConfig {
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        };

        let timeout_s = parse_f64(get("RESTYLE_REQUEST_TIMEOUT"))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
            .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S);
        let timeout = Duration::from_secs_f64(timeout_s);
        let retries = parse_f64(get("RESTYLE_MAX_RETRIES"))
            .map(|value| value.round().clamp(0.0, f64::from(RetryPolicy::MAX_RETRIES_CEILING)) as u32);
        let backoff = parse_f64(get("RESTYLE_RETRY_BACKOFF"))
            .map(|value| Duration::from_secs_f64(value.clamp(0.0, MAX_RETRY_BACKOFF_S)));

        let with_overrides = |provider: ProviderId| {
            let base = default_retry_policy(provider, timeout);
            RetryPolicy::new(
                retries.unwrap_or(base.max_retries),
                backoff.unwrap_or(base.base_delay),
                timeout,
            )
        };

        Self {
            openrouter,
            gemini,
            openrouter_retry: with_overrides(ProviderId::OpenRouter),
            gemini_retry: with_overrides(ProviderId::Gemini),
            max_inline_chars: get("RESTYLE_MAX_INLINE_CHARS")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_INLINE_CHARS),
        }
    }

    pub fn retry_policy(&self, provider: ProviderId) -> RetryPolicy {
        match provider {
            ProviderId::OpenRouter => self.openrouter_retry,
            ProviderId::Gemini => self.gemini_retry,
        }
    }
}

/// Observed per-provider defaults: the image preview models on the direct
/// Gemini API fail intermittently and get a longer budget.
pub fn default_retry_policy(provider: ProviderId, timeout: Duration) -> RetryPolicy {
    match provider {
        ProviderId::OpenRouter => RetryPolicy::new(2, Duration::from_secs(1), timeout),
        ProviderId::Gemini => RetryPolicy::new(4, Duration::from_secs(2), timeout),
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_f64(raw: Option<String>) -> Option<f64> {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.openrouter.api_base, DEFAULT_OPENROUTER_API_BASE);
        assert_eq!(config.openrouter.x_title, DEFAULT_X_TITLE);
        assert_eq!(config.openrouter_retry.max_retries, 2);
        assert_eq!(config.gemini_retry.max_retries, 4);
        assert_eq!(config.gemini_retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.max_inline_chars, 2_700_000);
    }

    #[test]
    fn gemini_key_falls_back_to_google_key_and_blank_is_unset() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "   "),
            ("GOOGLE_API_KEY", "g-key"),
            ("OPENROUTER_API_KEY", ""),
            ("GEMINI_API_BASE", "https://proxy.test/v1beta/"),
        ]);
        assert_eq!(config.gemini.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.openrouter.api_key, None);
        assert_eq!(config.gemini.api_base, "https://proxy.test/v1beta");
    }

    #[test]
    fn retry_overrides_are_clamped() {
        let config = config_from(&[
            ("RESTYLE_MAX_RETRIES", "9"),
            ("RESTYLE_RETRY_BACKOFF", "0.25"),
            ("RESTYLE_REQUEST_TIMEOUT", "2"),
            ("RESTYLE_MAX_INLINE_CHARS", "1000"),
        ]);
        for provider in ProviderId::ALL {
            let policy = config.retry_policy(provider);
            assert_eq!(policy.max_retries, 4);
            assert_eq!(policy.base_delay, Duration::from_millis(250));
            assert_eq!(policy.request_timeout, Duration::from_secs(15));
        }
        assert_eq!(config.max_inline_chars, 1000);

        let bogus = config_from(&[("RESTYLE_MAX_RETRIES", "many"), ("RESTYLE_RETRY_BACKOFF", "-3")]);
        assert_eq!(bogus.openrouter_retry.max_retries, 2);
        assert_eq!(bogus.openrouter_retry.base_delay, Duration::ZERO);
    }
}
