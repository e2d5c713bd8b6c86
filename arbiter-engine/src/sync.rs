//! Sync Tracker
//!
//! Per (task, agent) delivery watermark. Findings created after the
//! watermark are pending delivery; the watermark only moves after the
//! backend confirms a delivery, and only forwards.

use arbiter_core::{
    AgentId, ArbiterError, ArbiterResult, Delivery, DeliveryError, Finding, RetryConfig,
    SyncWatermark, TaskId, Timestamp,
};
use arbiter_storage::{FindingStore, MetadataStore};
use chrono::Utc;
use std::sync::Arc;

/// Result of a delivery attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing new since the last watermark; nothing posted.
    NothingPending,
    /// Backend confirmed; watermark committed.
    Delivered {
        count: usize,
        attempts: u32,
        watermark: SyncWatermark,
    },
}

/// Tracks what each agent has already been sent.
#[derive(Clone)]
pub struct SyncTracker {
    findings: Arc<dyn FindingStore>,
    metadata: Arc<dyn MetadataStore>,
    retry: RetryConfig,
}

impl SyncTracker {
    pub fn new(
        findings: Arc<dyn FindingStore>,
        metadata: Arc<dyn MetadataStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            findings,
            metadata,
            retry,
        }
    }

    /// The agent's findings created after its watermark, oldest first.
    /// Everything when no watermark exists yet. Read-only.
    pub async fn pending_for_delivery(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> ArbiterResult<Vec<Finding>> {
        let since = self
            .metadata
            .get_watermark(task_id, agent_id)
            .await?
            .map(|w| w.last_synced_at);
        self.findings
            .list_by_agent_since(task_id, agent_id, since)
            .await
    }

    /// Advance the watermark to `delivered_at`. Never moves it backwards;
    /// returns the watermark in effect afterwards.
    pub async fn commit(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        delivered_at: Timestamp,
    ) -> ArbiterResult<SyncWatermark> {
        let watermark = self
            .metadata
            .set_watermark(&SyncWatermark {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
                last_synced_at: delivered_at,
            })
            .await?;

        if watermark.last_synced_at > delivered_at {
            tracing::debug!(
                task_id = %task_id,
                agent_id = %agent_id,
                kept = %watermark.last_synced_at,
                "Later watermark already stored"
            );
        }
        Ok(watermark)
    }

    /// Deliver the agent's pending findings and commit on confirmation.
    ///
    /// The watermark committed is the time captured before reading, so a
    /// finding created while the post is in flight is picked up next time.
    /// Transport errors are retried with backoff; a rejection is not.
    pub async fn deliver(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        delivery: &dyn Delivery,
    ) -> ArbiterResult<DeliveryOutcome> {
        let started_at = Utc::now();
        let pending = self.pending_for_delivery(task_id, agent_id).await?;
        if pending.is_empty() {
            tracing::debug!(task_id = %task_id, agent_id = %agent_id, "No new findings to deliver");
            return Ok(DeliveryOutcome::NothingPending);
        }

        let max_attempts = self.retry.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match delivery.post(task_id, agent_id, &pending).await {
                Ok(true) => {
                    let watermark = self.commit(task_id, agent_id, started_at).await?;
                    tracing::info!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        count = pending.len(),
                        attempts = attempt,
                        watermark = %watermark.last_synced_at,
                        "Findings delivered"
                    );
                    return Ok(DeliveryOutcome::Delivered {
                        count: pending.len(),
                        attempts: attempt,
                        watermark,
                    });
                }
                Ok(false) => {
                    tracing::error!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        count = pending.len(),
                        "Delivery rejected by backend"
                    );
                    return Err(ArbiterError::Delivery(DeliveryError::Rejected {
                        agent_id: agent_id.clone(),
                    }));
                }
                Err(e) if attempt < max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Delivery failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        attempts = attempt,
                        error = %e,
                        "Delivery failed; giving up"
                    );
                    return Err(ArbiterError::Delivery(DeliveryError::RetriesExhausted {
                        agent_id: agent_id.clone(),
                        attempts: attempt,
                    }));
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncTracker")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
