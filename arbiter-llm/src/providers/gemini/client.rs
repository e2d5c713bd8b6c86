//! Gemini HTTP client with rate limiting

use super::types::{ApiError, GenerateContentRequest, GenerateContentResponse};
use crate::providers::{classify_failure, malformed, parse_retry_after_ms, transport_failure, RequestThrottle};
use crate::JudgeResult;
use reqwest::Client;

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API client with rate limiting.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    throttle: RequestThrottle,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            throttle: RequestThrottle::per_minute(requests_per_minute),
        }
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Call `models/{model}:generateContent`.
    pub async fn generate_content(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> JudgeResult<GenerateContentResponse> {
        let _permit = self.throttle.acquire(PROVIDER).await?;

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| transport_failure(PROVIDER, e))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers());

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| malformed(PROVIDER, format!("Failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };

            tracing::warn!(provider = PROVIDER, status = status.as_u16(), error = %error_msg, "Judge request failed");
            Err(classify_failure(PROVIDER, status, error_msg, retry_after_ms))
        }
    }
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
