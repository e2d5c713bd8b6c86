//! ARBITER LLM - Judge Abstraction
//!
//! The judge is an opaque oracle: it finds duplicates among a set of
//! findings and rates validity/severity of a batch. This crate defines the
//! narrow trait, a registry that routes each role to its own provider, and
//! adapters for the Anthropic and Gemini HTTP APIs.

pub mod parse;
pub mod prompts;
pub mod providers;

pub use providers::{AnthropicClient, AnthropicJudge, GeminiClient, GeminiJudge};

use arbiter_core::{
    ArbiterConfig, ArbiterError, ArbiterResult, ConfigError, DuplicateRelationship,
    FindingContent, FindingEvaluation, JudgeError, ProviderConfig,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Result type for judge calls.
pub type JudgeResult<T> = Result<T, JudgeError>;

// ============================================================================
// JUDGE TRAIT
// ============================================================================

/// Opaque similarity/validity oracle.
///
/// Implementations must be thread-safe (Send + Sync). Neither method
/// promises one answer per input; callers validate what comes back.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Find duplicate relationships among `findings` in one call.
    ///
    /// Only duplicates are listed, each pointing at the report chosen as the
    /// best of its group. An empty vector means no duplicates.
    async fn compare_all(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<DuplicateRelationship>>;

    /// Rate validity and severity of every finding in the batch.
    async fn evaluate_batch(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<FindingEvaluation>>;
}

// ============================================================================
// JUDGE REGISTRY
// ============================================================================

/// Routes deduplication and evaluation to separately registered judges.
/// Judges must be explicitly registered - no auto-discovery.
///
/// # Example
/// ```ignore
/// let mut registry = JudgeRegistry::new();
/// registry.register_deduplication(Arc::new(gemini_judge));
/// registry.register_evaluation(Arc::new(anthropic_judge));
///
/// // The registry is itself a Judge
/// let relationships = registry.compare_all(&contents).await?;
/// ```
#[derive(Clone, Default)]
pub struct JudgeRegistry {
    deduplication: Option<Arc<dyn Judge>>,
    evaluation: Option<Arc<dyn Judge>>,
}

impl JudgeRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that uses one judge for both roles.
    pub fn single(judge: Arc<dyn Judge>) -> Self {
        Self {
            deduplication: Some(judge.clone()),
            evaluation: Some(judge),
        }
    }

    /// Register the deduplication judge, replacing any previous one.
    pub fn register_deduplication(&mut self, judge: Arc<dyn Judge>) {
        self.deduplication = Some(judge);
    }

    /// Register the evaluation judge, replacing any previous one.
    pub fn register_evaluation(&mut self, judge: Arc<dyn Judge>) {
        self.evaluation = Some(judge);
    }

    /// Get the registered deduplication judge.
    pub fn deduplication(&self) -> JudgeResult<Arc<dyn Judge>> {
        self.deduplication
            .clone()
            .ok_or(JudgeError::ProviderNotConfigured)
    }

    /// Get the registered evaluation judge.
    pub fn evaluation(&self) -> JudgeResult<Arc<dyn Judge>> {
        self.evaluation
            .clone()
            .ok_or(JudgeError::ProviderNotConfigured)
    }

    pub fn has_deduplication(&self) -> bool {
        self.deduplication.is_some()
    }

    pub fn has_evaluation(&self) -> bool {
        self.evaluation.is_some()
    }
}

impl std::fmt::Debug for JudgeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JudgeRegistry")
            .field("deduplication", &self.deduplication.is_some())
            .field("evaluation", &self.evaluation.is_some())
            .finish()
    }
}

#[async_trait]
impl Judge for JudgeRegistry {
    async fn compare_all(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<DuplicateRelationship>> {
        self.deduplication()?.compare_all(findings).await
    }

    async fn evaluate_batch(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<FindingEvaluation>> {
        self.evaluation()?.evaluate_batch(findings).await
    }
}

// ============================================================================
// CONSTRUCTION FROM CONFIG
// ============================================================================

/// Build a judge for `config`, reading the API key from `config.api_key_env`.
pub fn build_judge(config: &ProviderConfig) -> ArbiterResult<Arc<dyn Judge>> {
    let api_key = std::env::var(&config.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            ArbiterError::Config(ConfigError::MissingRequired {
                field: config.api_key_env.clone(),
            })
        })?;
    build_judge_with_key(config, api_key)
}

/// Build a judge for `config` with an explicit API key.
pub fn build_judge_with_key(
    config: &ProviderConfig,
    api_key: impl Into<String>,
) -> ArbiterResult<Arc<dyn Judge>> {
    match config.provider_type.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicJudge::from_config(config, api_key))),
        "gemini" => Ok(Arc::new(GeminiJudge::from_config(config, api_key))),
        other => Err(ArbiterError::Config(ConfigError::ProviderNotSupported {
            provider: other.to_string(),
        })),
    }
}

/// Build the registry described by `config`.
///
/// When only one role has a provider, that judge serves both roles. With
/// none configured the registry is empty and every call reports
/// `ProviderNotConfigured`.
pub fn build_registry(config: &ArbiterConfig) -> ArbiterResult<JudgeRegistry> {
    let dedup = config
        .deduplication_provider
        .as_ref()
        .map(build_judge)
        .transpose()?;
    let eval = config
        .evaluation_provider
        .as_ref()
        .map(build_judge)
        .transpose()?;

    let registry = match (dedup, eval) {
        (Some(dedup), Some(eval)) => {
            let mut registry = JudgeRegistry::new();
            registry.register_deduplication(dedup);
            registry.register_evaluation(eval);
            registry
        }
        (Some(only), None) | (None, Some(only)) => {
            tracing::info!("Single judge provider configured, using it for both roles");
            JudgeRegistry::single(only)
        }
        (None, None) => {
            tracing::warn!("No judge provider configured");
            JudgeRegistry::new()
        }
    };

    Ok(registry)
}
