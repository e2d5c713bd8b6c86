//! Error types for ARBITER operations

use crate::{AgentId, FindingId, TaskId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Finding not found in task {task_id}: {id}")]
    NotFound { task_id: TaskId, id: FindingId },

    #[error("Insert failed for task {task_id}: {reason}")]
    InsertFailed { task_id: TaskId, reason: String },

    #[error("Update failed for finding {id}: {reason}")]
    UpdateFailed { id: FindingId, reason: String },

    #[error("Metadata write failed for key {key}: {reason}")]
    MetadataFailed { key: String, reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Judge (LLM provider) errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JudgeError {
    #[error("No judge provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Malformed response from {provider}: {reason}")]
    Malformed { provider: String, reason: String },

    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },
}

impl JudgeError {
    /// Whether the judge answered but the answer could not be used.
    pub fn is_malformed(&self) -> bool {
        matches!(self, JudgeError::Malformed { .. })
    }
}

/// Validation errors raised at the submission boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Submission contains no findings")]
    EmptySubmission,

    #[error("Submission of {submitted} findings exceeds the limit of {limit}")]
    SubmissionLimitExceeded { submitted: usize, limit: usize },

    #[error("Task {task_id} is not accepting submissions: {reason}")]
    OutsideSubmissionWindow { task_id: TaskId, reason: String },

    #[error("Unknown task: {task_id}")]
    UnknownTask { task_id: TaskId },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },
}

/// Outbound delivery errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery endpoint not configured")]
    NotConfigured,

    #[error("Delivery for {agent_id} rejected by backend")]
    Rejected { agent_id: AgentId },

    #[error("Delivery transport failed: {reason}")]
    Transport { reason: String },

    #[error("Delivery for {agent_id} gave up after {attempts} attempts")]
    RetriesExhausted { agent_id: AgentId, attempts: u32 },
}

/// Master error type for all ARBITER errors.
#[derive(Debug, Clone, Error)]
pub enum ArbiterError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Judge error: {0}")]
    Judge(#[from] JudgeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Result type alias for ARBITER operations.
pub type ArbiterResult<T> = Result<T, ArbiterError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let id = FindingId::now_v7();
        let err = StorageError::NotFound {
            task_id: TaskId::from("t1"),
            id,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Finding not found"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_submission_limit_display() {
        let err = ValidationError::SubmissionLimitExceeded {
            submitted: 21,
            limit: 20,
        };
        assert_eq!(
            err.to_string(),
            "Submission of 21 findings exceeds the limit of 20"
        );
    }

    #[test]
    fn test_judge_error_classification() {
        let malformed = JudgeError::Malformed {
            provider: "anthropic".to_string(),
            reason: "no JSON".to_string(),
        };
        let timeout = JudgeError::Timeout {
            provider: "anthropic".to_string(),
            after_ms: 120_000,
        };
        assert!(malformed.is_malformed());
        assert!(!timeout.is_malformed());
        assert!(!JudgeError::ProviderNotConfigured.is_malformed());
    }

    #[test]
    fn test_master_error_from_conversions() {
        let err: ArbiterError = ConfigError::MissingRequired {
            field: "delivery_endpoint".to_string(),
        }
        .into();
        assert!(matches!(err, ArbiterError::Config(_)));
        assert!(err.to_string().starts_with("Config error:"));

        let err: ArbiterError = DeliveryError::NotConfigured.into();
        assert!(matches!(err, ArbiterError::Delivery(DeliveryError::NotConfigured)));
    }
}
