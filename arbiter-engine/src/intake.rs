//! Submission intake
//!
//! The boundary in front of the engine: rejects malformed or oversized
//! submissions and submissions outside the task's window, then stores the
//! accepted findings as `Pending` under one submission batch id.

use crate::schedule::TaskScheduleCache;
use arbiter_core::{
    AgentId, ArbiterResult, Finding, FindingId, NewFinding, TaskId, Timestamp, ValidationError,
};
use arbiter_storage::{FindingStore, MetadataStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// What the submitting agent gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub submission_batch_id: u64,
    pub finding_ids: Vec<FindingId>,
    pub accepted_at: Timestamp,
}

/// Validates and stores agent submissions.
#[derive(Clone)]
pub struct SubmissionGate {
    findings: Arc<dyn FindingStore>,
    metadata: Arc<dyn MetadataStore>,
    schedules: Option<Arc<TaskScheduleCache>>,
    max_findings_per_submission: usize,
}

impl SubmissionGate {
    /// Gate without a window check. Use `with_schedules` to enforce one.
    pub fn new(
        findings: Arc<dyn FindingStore>,
        metadata: Arc<dyn MetadataStore>,
        max_findings_per_submission: usize,
    ) -> Self {
        Self {
            findings,
            metadata,
            schedules: None,
            max_findings_per_submission,
        }
    }

    pub fn with_schedules(mut self, schedules: Arc<TaskScheduleCache>) -> Self {
        self.schedules = Some(schedules);
        self
    }

    /// Check submission content. Does not touch the store.
    pub fn validate(&self, submitted: &[NewFinding]) -> Result<(), ValidationError> {
        if submitted.is_empty() {
            return Err(ValidationError::EmptySubmission);
        }

        if submitted.len() > self.max_findings_per_submission {
            return Err(ValidationError::SubmissionLimitExceeded {
                submitted: submitted.len(),
                limit: self.max_findings_per_submission,
            });
        }

        for (index, finding) in submitted.iter().enumerate() {
            if finding.title.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: format!("findings[{}].title", index),
                });
            }
            if finding.description.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: format!("findings[{}].description", index),
                });
            }
        }

        Ok(())
    }

    /// Validate and store a submission.
    ///
    /// The batch id is drawn only after every check passed, so rejected
    /// submissions leave no gap in the agent's sequence.
    pub async fn submit(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        submitted: Vec<NewFinding>,
    ) -> ArbiterResult<SubmissionReceipt> {
        self.validate(&submitted)?;

        let now = Utc::now();
        self.check_window(task_id, now).await?;

        let submission_batch_id = self
            .metadata
            .next_submission_batch_id(task_id, agent_id)
            .await?;

        let findings: Vec<Finding> = submitted
            .into_iter()
            .map(|new| {
                Finding::from_submission(
                    task_id.clone(),
                    agent_id.clone(),
                    submission_batch_id,
                    new,
                    now,
                )
            })
            .collect();

        // The store stamps creation time as the findings become visible, so
        // a delivery that read before this insert commits an earlier
        // watermark than these findings carry.
        let stored = self.findings.insert_submission(findings).await?;
        let accepted_at = stored.first().map_or(now, |f| f.created_at);

        tracing::info!(
            task_id = %task_id,
            agent_id = %agent_id,
            submission_batch_id,
            count = stored.len(),
            "Submission accepted"
        );

        Ok(SubmissionReceipt {
            task_id: task_id.clone(),
            agent_id: agent_id.clone(),
            submission_batch_id,
            finding_ids: stored.iter().map(|f| f.id).collect(),
            accepted_at,
        })
    }

    async fn check_window(&self, task_id: &TaskId, now: Timestamp) -> ArbiterResult<()> {
        let Some(schedules) = &self.schedules else {
            return Ok(());
        };

        let schedule = schedules
            .get(task_id)
            .await?
            .ok_or_else(|| ValidationError::UnknownTask {
                task_id: task_id.clone(),
            })?;

        if now < schedule.start_time {
            return Err(ValidationError::OutsideSubmissionWindow {
                task_id: task_id.clone(),
                reason: format!("submissions open at {}", schedule.start_time),
            }
            .into());
        }
        if now > schedule.deadline {
            return Err(ValidationError::OutsideSubmissionWindow {
                task_id: task_id.clone(),
                reason: format!("deadline passed at {}", schedule.deadline),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for SubmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionGate")
            .field("window_checked", &self.schedules.is_some())
            .field("max_findings_per_submission", &self.max_findings_per_submission)
            .finish_non_exhaustive()
    }
}
