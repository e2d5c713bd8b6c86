//! Gemini judge implementation

use super::client::GeminiClient;
use super::types::{Content, GenerateContentRequest, GenerationConfig};
use crate::providers::malformed;
use crate::{parse, prompts, Judge, JudgeResult};
use arbiter_core::{
    DuplicateRelationship, FindingContent, FindingEvaluation, ProviderConfig, DEFAULT_GEMINI_MODEL,
    DEFAULT_REQUESTS_PER_MINUTE,
};
use async_trait::async_trait;

const PROVIDER: &str = "gemini";

/// Judge backed by Gemini with JSON-mode responses.
pub struct GeminiJudge {
    client: GeminiClient,
    model: String,
    max_output_tokens: u32,
    temperature: f32,
}

impl GeminiJudge {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: GeminiClient::new(api_key, DEFAULT_REQUESTS_PER_MINUTE),
            model: model.into(),
            max_output_tokens: 8_192,
            temperature: 0.0,
        }
    }

    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_GEMINI_MODEL)
    }

    /// Create a judge from provider configuration.
    pub fn from_config(config: &ProviderConfig, api_key: impl Into<String>) -> Self {
        let mut client = GeminiClient::new(api_key, config.requests_per_minute);
        if let Some(endpoint) = &config.endpoint {
            client = client.with_base_url(endpoint.clone());
        }
        Self {
            client,
            model: config.model.clone(),
            max_output_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request(&self, system: &str, prompt: String) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content::text(Some("user"), prompt)],
            system_instruction: Some(Content::text(None, system)),
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        }
    }

    async fn ask(&self, system: &str, prompt: String) -> JudgeResult<String> {
        let request = self.request(system, prompt);
        let response = self.client.generate_content(&self.model, &request).await?;
        if response.finish_reason() == Some("MAX_TOKENS") {
            tracing::warn!(model = %self.model, "Judge answer truncated at max tokens");
        }
        response
            .text()
            .ok_or_else(|| malformed(PROVIDER, "response has no candidate text"))
    }
}

#[async_trait]
impl Judge for GeminiJudge {
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
        parse::parse_evaluations(PROVIDER, &answer)
    }
}

impl std::fmt::Debug for GeminiJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiJudge")
            .field("model", &self.model)
            .finish()
    }
}
