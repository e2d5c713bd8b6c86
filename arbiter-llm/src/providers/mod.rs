//! Judge provider implementations
//!
//! Concrete `Judge` adapters for hosted LLM APIs, plus the request
//! throttling and error mapping they share.

pub mod anthropic;
pub mod gemini;

pub use anthropic::{AnthropicClient, AnthropicJudge};
pub use gemini::{GeminiClient, GeminiJudge};

use arbiter_core::JudgeError;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

// ============================================================================
// THROTTLE
// ============================================================================

/// Client-side rate limiting: bounded concurrency plus a minimum spacing
/// between request starts.
pub(crate) struct RequestThrottle {
    permits: Semaphore,
    /// Earliest start for the next request. Each caller reserves its slot
    /// under the lock, so concurrent callers never share one.
    next_slot: Mutex<Option<Instant>>,
    min_request_interval: Duration,
}

impl RequestThrottle {
    pub(crate) fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            permits: Semaphore::new(rpm as usize),
            next_slot: Mutex::new(None),
            min_request_interval: Duration::from_millis((60_000 / rpm as u64).max(10)),
        }
    }

    pub(crate) fn min_interval(&self) -> Duration {
        self.min_request_interval
    }

    /// Wait for a permit and for the spacing interval to pass.
    pub(crate) async fn acquire(&self, provider: &str) -> Result<SemaphorePermit<'_>, JudgeError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| request_failed(provider, 0, format!("Rate limiter error: {}", e)))?;

        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |next| next.max(now));
            *next_slot = Some(slot + self.min_request_interval);
            slot
        };
        tokio::time::sleep_until(slot).await;

        Ok(permit)
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> JudgeError {
    JudgeError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn malformed(provider: &str, reason: impl Into<String>) -> JudgeError {
    JudgeError::Malformed {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

/// Map a failed HTTP status to a judge error.
pub(crate) fn classify_failure(
    provider: &str,
    status: StatusCode,
    message: String,
    retry_after_ms: Option<u64>,
) -> JudgeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => JudgeError::RateLimited {
            provider: provider.to_string(),
            retry_after_ms: retry_after_ms.unwrap_or(0),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => JudgeError::InvalidApiKey {
            provider: provider.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => JudgeError::Timeout {
            provider: provider.to_string(),
            after_ms: 0,
        },
        _ => request_failed(provider, status.as_u16(), message),
    }
}

/// Map a transport-level failure to a judge error.
pub(crate) fn transport_failure(provider: &str, error: reqwest::Error) -> JudgeError {
    if error.is_timeout() {
        JudgeError::Timeout {
            provider: provider.to_string(),
            after_ms: 0,
        }
    } else {
        request_failed(provider, 0, format!("HTTP request failed: {}", error))
    }
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|seconds| (seconds.max(0.0) * 1000.0) as u64)
}
