//! HTTP delivery of evaluated findings to the results backend

use arbiter_core::{
    AgentId, ArbiterConfig, ArbiterError, ArbiterResult, Delivery, DeliveryError, Finding,
    TaskId, Timestamp,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Body posted per (task, agent).
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload<'a> {
    pub task_id: &'a TaskId,
    pub agent_id: &'a AgentId,
    pub findings: Vec<DeliveredFinding<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveredFinding<'a> {
    pub id: String,
    pub title: &'a str,
    pub description: &'a str,
    pub severity: &'static str,
    pub status: &'static str,
    pub evaluated_severity: Option<&'static str>,
    pub file_paths: &'a [String],
    pub created_at: Timestamp,
}

impl<'a> From<&'a Finding> for DeliveredFinding<'a> {
    fn from(finding: &'a Finding) -> Self {
        Self {
            id: finding.id.to_string(),
            title: &finding.title,
            description: &finding.description,
            severity: finding.reported_severity.as_db_str(),
            status: finding.status.as_db_str(),
            evaluated_severity: finding.evaluated_severity.map(|s| s.as_db_str()),
            file_paths: &finding.file_references,
            created_at: finding.created_at,
        }
    }
}

impl<'a> DeliveryPayload<'a> {
    pub fn new(task_id: &'a TaskId, agent_id: &'a AgentId, findings: &'a [Finding]) -> Self {
        Self {
            task_id,
            agent_id,
            findings: findings.iter().map(DeliveredFinding::from).collect(),
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Posts findings as JSON with an `X-API-Key` header.
///
/// 2xx confirms. 408, 429 and 5xx are transport failures worth retrying.
/// Any other status is a definite rejection.
pub struct HttpDelivery {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDelivery {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> ArbiterResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                ArbiterError::Delivery(DeliveryError::Transport {
                    reason: format!("Failed to build HTTP client: {}", e),
                })
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Build from config. `None` when no delivery endpoint is configured.
    ///
    /// The API key is read from the variable named by
    /// `delivery_api_key_env`; a missing key sends no header.
    pub fn from_config(config: &ArbiterConfig) -> ArbiterResult<Option<Self>> {
        let Some(endpoint) = config.delivery_endpoint.as_ref() else {
            return Ok(None);
        };

        let api_key = std::env::var(&config.delivery_api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                env = %config.delivery_api_key_env,
                "Delivery API key not set; posting without X-API-Key"
            );
        }

        Self::new(endpoint.clone(), api_key).map(Some)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn post(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        findings: &[Finding],
    ) -> ArbiterResult<bool> {
        let payload = DeliveryPayload::new(task_id, agent_id, findings);

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            ArbiterError::Delivery(DeliveryError::Transport {
                reason: e.to_string(),
            })
        })?;

        let status = response.status();
        tracing::debug!(
            task_id = %task_id,
            agent_id = %agent_id,
            status = status.as_u16(),
            "Delivery response received"
        );

        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if is_retryable(status) {
            return Err(ArbiterError::Delivery(DeliveryError::Transport {
                reason: format!("status {}: {}", status.as_u16(), body),
            }));
        }

        tracing::error!(
            task_id = %task_id,
            agent_id = %agent_id,
            status = status.as_u16(),
            body = %body,
            "Delivery rejected"
        );
        Ok(false)
    }
}

impl std::fmt::Debug for HttpDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDelivery")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
