//! Anthropic (Claude) judge implementation

use super::client::AnthropicClient;
use super::types::{Message, MessageRequest, MessageResponse};
use crate::{parse, prompts, Judge, JudgeResult};
use arbiter_core::{
    DuplicateRelationship, FindingContent, FindingEvaluation, ProviderConfig,
    DEFAULT_ANTHROPIC_MODEL, DEFAULT_MAX_TOKENS, DEFAULT_REQUESTS_PER_MINUTE,
};
use async_trait::async_trait;

const PROVIDER: &str = "anthropic";

/// Judge backed by the Anthropic messages API.
pub struct AnthropicJudge {
    client: AnthropicClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicJudge {
    /// Create a new Anthropic judge with deterministic sampling.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-3-7-sonnet-20250219")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: AnthropicClient::new(api_key, DEFAULT_REQUESTS_PER_MINUTE),
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
        }
    }

    /// Create judge with the default Claude model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_ANTHROPIC_MODEL)
    }

    /// Create a judge from provider configuration.
    pub fn from_config(config: &ProviderConfig, api_key: impl Into<String>) -> Self {
        let mut client = AnthropicClient::new(api_key, config.requests_per_minute);
        if let Some(endpoint) = &config.endpoint {
            client = client.with_base_url(endpoint.clone());
        }
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    async fn ask(&self, system: &str, prompt: String) -> JudgeResult<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            system: Some(system.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        };

        let response: MessageResponse = self.client.request("messages", &request).await?;
        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(model = %self.model, "Judge answer truncated at max_tokens");
        }
        Ok(response.text())
    }
}

#[async_trait]
impl Judge for AnthropicJudge {
    async fn compare_all(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<DuplicateRelationship>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }

        let answer = self
            .ask(prompts::DEDUPLICATION_SYSTEM, prompts::deduplication_prompt(findings))
            .await?;
        let relationships = parse::parse_relationships(PROVIDER, &answer)?;

        tracing::debug!(
            model = %self.model,
            findings = findings.len(),
            relationships = relationships.len(),
            "Deduplication answer parsed"
        );
        Ok(relationships)
    }

    async fn evaluate_batch(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<FindingEvaluation>> {
        if findings.is_empty() {
            return Ok(Vec::new());
        }

        let answer = self
            .ask(prompts::EVALUATION_SYSTEM, prompts::evaluation_prompt(findings))
            .await?;
        let evaluations = parse::parse_evaluations(PROVIDER, &answer)?;

        tracing::debug!(
            model = %self.model,
            findings = findings.len(),
            evaluations = evaluations.len(),
            "Evaluation answer parsed"
        );
        Ok(evaluations)
    }
}

impl std::fmt::Debug for AnthropicJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicJudge")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}
