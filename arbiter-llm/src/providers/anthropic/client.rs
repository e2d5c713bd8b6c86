//! Anthropic HTTP client with rate limiting

use super::types::ApiError;
use crate::providers::{classify_failure, malformed, parse_retry_after_ms, transport_failure, RequestThrottle};
use crate::JudgeResult;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    throttle: RequestThrottle,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `requests_per_minute` - Maximum requests per minute (default: 50)
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            throttle: RequestThrottle::per_minute(requests_per_minute),
        }
    }

    /// Point the client at a different API root (proxies, gateways).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an API request with automatic rate limiting.
    pub async fn request<Req: Serialize + Sync, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Req,
    ) -> JudgeResult<Res> {
        let _permit = self.throttle.acquire(PROVIDER).await?;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
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

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
