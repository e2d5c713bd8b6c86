//! Engine configuration

use crate::{ArbiterError, ArbiterResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_FINDINGS_PER_SUBMISSION: usize = 20;
pub const DEFAULT_JUDGE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_EVALUATION_CONCURRENCY: usize = 4;
pub const DEFAULT_SCHEDULE_REFRESH_SECS: u64 = 300;
pub const DEFAULT_DELIVERY_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DELIVERY_API_KEY_ENV: &str = "ARBITER_DELIVERY_API_KEY";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_MAX_TOKENS: u32 = 20_000;
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

/// Provider types `build_judge` knows how to construct.
pub const SUPPORTED_PROVIDERS: [&str; 2] = ["anthropic", "gemini"];

// ============================================================================
// PROVIDER / RETRY
// ============================================================================

/// Judge provider configuration.
///
/// The API key itself never lives here; only the name of the environment
/// variable holding it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: String,
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub requests_per_minute: u32,
}

impl ProviderConfig {
    /// Anthropic messages API with deterministic sampling.
    pub fn anthropic(model: impl Into<String>) -> Self {
        Self {
            provider_type: "anthropic".to_string(),
            model: model.into(),
            endpoint: None,
            api_key_env: DEFAULT_ANTHROPIC_API_KEY_ENV.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }

    /// Gemini generateContent API with deterministic sampling.
    pub fn gemini(model: impl Into<String>) -> Self {
        Self {
            provider_type: "gemini".to_string(),
            model: model.into(),
            endpoint: None,
            api_key_env: DEFAULT_GEMINI_API_KEY_ENV.to_string(),
            max_tokens: 8_192,
            temperature: 0.0,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
        }
    }

    /// Build from a provider name with that provider's defaults.
    pub fn for_provider(provider_type: &str, model: Option<String>) -> ArbiterResult<Self> {
        match provider_type.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::anthropic(
                model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            )),
            "gemini" | "google" => Ok(Self::gemini(
                model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            )),
            other => Err(ArbiterError::Config(ConfigError::ProviderNotSupported {
                provider: other.to_string(),
            })),
        }
    }

    fn validate(&self, field: &str) -> ArbiterResult<()> {
        if !SUPPORTED_PROVIDERS.contains(&self.provider_type.as_str()) {
            return Err(ArbiterError::Config(ConfigError::ProviderNotSupported {
                provider: self.provider_type.clone(),
            }));
        }

        if self.model.trim().is_empty() {
            return Err(ArbiterError::Config(ConfigError::MissingRequired {
                field: format!("{field}.model"),
            }));
        }

        if self.api_key_env.trim().is_empty() {
            return Err(ArbiterError::Config(ConfigError::MissingRequired {
                field: format!("{field}.api_key_env"),
            }));
        }

        if self.max_tokens == 0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: format!("{field}.max_tokens"),
                value: self.max_tokens.to_string(),
                reason: "max_tokens must be greater than 0".to_string(),
            }));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: format!("{field}.temperature"),
                value: self.temperature.to_string(),
                reason: "temperature must be between 0.0 and 2.0".to_string(),
            }));
        }

        if self.requests_per_minute == 0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: format!("{field}.requests_per_minute"),
                value: self.requests_per_minute.to_string(),
                reason: "requests_per_minute must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

/// Retry configuration for outbound delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_DELIVERY_MAX_RETRIES,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = f64::from(self.backoff_multiplier).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for the finding lifecycle engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterConfig {
    // Batching
    pub max_batch_size: usize,
    pub max_findings_per_submission: usize,

    // Judge
    pub judge_timeout: Duration,
    pub evaluation_concurrency: usize,
    pub deduplication_provider: Option<ProviderConfig>,
    pub evaluation_provider: Option<ProviderConfig>,

    // Delivery
    pub delivery_endpoint: Option<String>,
    pub delivery_api_key_env: String,
    pub delivery_retry: RetryConfig,

    // Scheduling
    pub schedule_refresh_interval: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_findings_per_submission: DEFAULT_MAX_FINDINGS_PER_SUBMISSION,
            judge_timeout: Duration::from_secs(DEFAULT_JUDGE_TIMEOUT_SECS),
            evaluation_concurrency: DEFAULT_EVALUATION_CONCURRENCY,
            deduplication_provider: None,
            evaluation_provider: None,
            delivery_endpoint: None,
            delivery_api_key_env: DEFAULT_DELIVERY_API_KEY_ENV.to_string(),
            delivery_retry: RetryConfig::default(),
            schedule_refresh_interval: Duration::from_secs(DEFAULT_SCHEDULE_REFRESH_SECS),
        }
    }
}

impl ArbiterConfig {
    /// Create ArbiterConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ARBITER_MAX_BATCH_SIZE`: Findings per evaluation chunk (default: 10)
    /// - `ARBITER_MAX_FINDINGS_PER_SUBMISSION`: Intake cap (default: 20)
    /// - `ARBITER_JUDGE_TIMEOUT_SECS`: Bound on each judge call (default: 120)
    /// - `ARBITER_EVALUATION_CONCURRENCY`: Parallel evaluation batches (default: 4)
    /// - `ARBITER_DEDUP_PROVIDER` / `ARBITER_DEDUP_MODEL`: Deduplication judge
    /// - `ARBITER_EVAL_PROVIDER` / `ARBITER_EVAL_MODEL`: Evaluation judge
    /// - `ARBITER_DELIVERY_ENDPOINT`: Where evaluated findings are posted
    /// - `ARBITER_DELIVERY_API_KEY_ENV`: Variable holding the delivery key
    /// - `ARBITER_DELIVERY_MAX_RETRIES`: Delivery retries (default: 3)
    /// - `ARBITER_SCHEDULE_REFRESH_SECS`: Task schedule refresh (default: 300)
    ///
    /// Unparseable values fall back to their defaults. An unknown provider
    /// name is an error.
    pub fn from_env() -> ArbiterResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> ArbiterResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let provider = |kind_key: &str, model_key: &str| -> ArbiterResult<Option<ProviderConfig>> {
            match lookup(kind_key) {
                Some(kind) if !kind.trim().is_empty() => {
                    ProviderConfig::for_provider(&kind, lookup(model_key)).map(Some)
                }
                _ => Ok(None),
            }
        };

        let delivery_retry = RetryConfig {
            max_retries: parsed("ARBITER_DELIVERY_MAX_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.delivery_retry.max_retries),
            ..defaults.delivery_retry.clone()
        };

        Ok(Self {
            max_batch_size: parsed("ARBITER_MAX_BATCH_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_batch_size),
            max_findings_per_submission: parsed("ARBITER_MAX_FINDINGS_PER_SUBMISSION")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_findings_per_submission),
            judge_timeout: parsed("ARBITER_JUDGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.judge_timeout),
            evaluation_concurrency: parsed("ARBITER_EVALUATION_CONCURRENCY")
                .map(|v| v as usize)
                .unwrap_or(defaults.evaluation_concurrency),
            deduplication_provider: provider("ARBITER_DEDUP_PROVIDER", "ARBITER_DEDUP_MODEL")?,
            evaluation_provider: provider("ARBITER_EVAL_PROVIDER", "ARBITER_EVAL_MODEL")?,
            delivery_endpoint: lookup("ARBITER_DELIVERY_ENDPOINT").filter(|s| !s.trim().is_empty()),
            delivery_api_key_env: lookup("ARBITER_DELIVERY_API_KEY_ENV")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.delivery_api_key_env),
            delivery_retry,
            schedule_refresh_interval: parsed("ARBITER_SCHEDULE_REFRESH_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.schedule_refresh_interval),
        })
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(ArbiterError::Config) if invalid.
    ///
    /// Validates:
    /// - batch and submission sizes > 0
    /// - judge_timeout and schedule_refresh_interval are positive
    /// - evaluation_concurrency > 0
    /// - retry backoff is non-shrinking and bounded
    /// - every configured provider is supported and sane
    pub fn validate(&self) -> ArbiterResult<()> {
        if self.max_batch_size == 0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "max_batch_size".to_string(),
                value: self.max_batch_size.to_string(),
                reason: "max_batch_size must be greater than 0".to_string(),
            }));
        }

        if self.max_findings_per_submission == 0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "max_findings_per_submission".to_string(),
                value: self.max_findings_per_submission.to_string(),
                reason: "max_findings_per_submission must be greater than 0".to_string(),
            }));
        }

        if self.judge_timeout.is_zero() {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "judge_timeout".to_string(),
                value: format!("{:?}", self.judge_timeout),
                reason: "judge_timeout must be positive".to_string(),
            }));
        }

        if self.evaluation_concurrency == 0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "evaluation_concurrency".to_string(),
                value: self.evaluation_concurrency.to_string(),
                reason: "evaluation_concurrency must be greater than 0".to_string(),
            }));
        }

        if self.schedule_refresh_interval.is_zero() {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "schedule_refresh_interval".to_string(),
                value: format!("{:?}", self.schedule_refresh_interval),
                reason: "schedule_refresh_interval must be positive".to_string(),
            }));
        }

        if self.delivery_retry.backoff_multiplier < 1.0 {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "delivery_retry.backoff_multiplier".to_string(),
                value: self.delivery_retry.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }));
        }

        if self.delivery_retry.initial_backoff > self.delivery_retry.max_backoff {
            return Err(ArbiterError::Config(ConfigError::InvalidValue {
                field: "delivery_retry.initial_backoff".to_string(),
                value: format!("{:?}", self.delivery_retry.initial_backoff),
                reason: "initial_backoff must not exceed max_backoff".to_string(),
            }));
        }

        if let Some(provider) = &self.deduplication_provider {
            provider.validate("deduplication_provider")?;
        }
        if let Some(provider) = &self.evaluation_provider {
            provider.validate("evaluation_provider")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ArbiterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.max_findings_per_submission, 20);
        assert_eq!(config.judge_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = ArbiterConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ArbiterConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = ArbiterConfig::from_lookup(lookup_from(&[
            ("ARBITER_MAX_BATCH_SIZE", "5"),
            ("ARBITER_JUDGE_TIMEOUT_SECS", "30"),
            ("ARBITER_DEDUP_PROVIDER", "gemini"),
            ("ARBITER_EVAL_PROVIDER", "anthropic"),
            ("ARBITER_EVAL_MODEL", "claude-custom"),
            ("ARBITER_DELIVERY_ENDPOINT", "https://backend.example/findings"),
        ]))
        .unwrap();

        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.judge_timeout, Duration::from_secs(30));
        let dedup = config.deduplication_provider.unwrap();
        assert_eq!(dedup.provider_type, "gemini");
        assert_eq!(dedup.model, DEFAULT_GEMINI_MODEL);
        let eval = config.evaluation_provider.unwrap();
        assert_eq!(eval.model, "claude-custom");
        assert_eq!(eval.api_key_env, DEFAULT_ANTHROPIC_API_KEY_ENV);
        assert_eq!(
            config.delivery_endpoint.as_deref(),
            Some("https://backend.example/findings")
        );
    }

    #[test]
    fn test_from_lookup_ignores_garbage_numbers() {
        let config =
            ArbiterConfig::from_lookup(lookup_from(&[("ARBITER_MAX_BATCH_SIZE", "ten")])).unwrap();
        assert_eq!(config.max_batch_size, DEFAULT_MAX_BATCH_SIZE);
    }

    #[test]
    fn test_from_lookup_rejects_unknown_provider() {
        let result = ArbiterConfig::from_lookup(lookup_from(&[("ARBITER_DEDUP_PROVIDER", "oracle")]));
        assert!(matches!(
            result,
            Err(ArbiterError::Config(ConfigError::ProviderNotSupported { .. }))
        ));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let config = ArbiterConfig {
            max_batch_size: 0,
            ..ArbiterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ArbiterError::Config(ConfigError::InvalidValue { field, .. })) if field == "max_batch_size"
        ));
    }

    #[test]
    fn test_validate_provider_temperature() {
        let mut provider = ProviderConfig::anthropic(DEFAULT_ANTHROPIC_MODEL);
        provider.temperature = 3.5;
        let config = ArbiterConfig {
            evaluation_provider: Some(provider),
            ..ArbiterConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ArbiterError::Config(ConfigError::InvalidValue { field, .. })) if field == "evaluation_provider.temperature"
        ));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(350));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(350));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: backoff never exceeds max_backoff and never shrinks between attempts
        #[test]
        fn prop_backoff_bounded_and_monotonic(
            initial_ms in 0u64..1_000,
            extra_ms in 0u64..10_000,
            multiplier in 1.0f32..4.0,
            attempt in 1u32..20,
        ) {
            let retry = RetryConfig {
                max_retries: 20,
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(initial_ms + extra_ms),
                backoff_multiplier: multiplier,
            };
            let this = retry.backoff_for(attempt);
            let next = retry.backoff_for(attempt + 1);
            prop_assert!(this <= retry.max_backoff);
            prop_assert!(next >= this);
        }

        /// Property: any positive batch size passes validate()
        #[test]
        fn prop_positive_batch_size_validates(size in 1usize..1_000) {
            let config = ArbiterConfig { max_batch_size: size, ..ArbiterConfig::default() };
            prop_assert!(config.validate().is_ok());
        }
    }
}
