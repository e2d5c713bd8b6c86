//! Verdict Applier
//!
//! Writes judge verdicts back to the store, one point update per finding.
//! A failed write never stops the others.

use arbiter_core::{ArbiterResult, EvaluatedSeverity, FindingEvaluation, FindingStatus, TaskId};
use arbiter_storage::{FindingStore, FindingUpdate};
use serde::Serialize;
use std::sync::Arc;

/// Counts from one `apply` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub valid_count: usize,
    pub disputed_count: usize,
    /// Store reads or writes that failed.
    pub failed_count: usize,
    /// Verdicts naming a finding the store does not have.
    pub unknown_count: usize,
    /// Invalid verdicts on findings that cannot move to `Disputed`.
    pub kept_status_count: usize,
}

impl ApplyOutcome {
    pub fn merge(&mut self, other: ApplyOutcome) {
        self.valid_count += other.valid_count;
        self.disputed_count += other.disputed_count;
        self.failed_count += other.failed_count;
        self.unknown_count += other.unknown_count;
        self.kept_status_count += other.kept_status_count;
    }

    pub fn applied(&self) -> usize {
        self.valid_count + self.disputed_count + self.kept_status_count
    }
}

enum Applied {
    Valid,
    Disputed,
    KeptStatus,
    Unknown,
}

/// Applies evaluation verdicts to stored findings.
#[derive(Clone)]
pub struct VerdictApplier {
    store: Arc<dyn FindingStore>,
}

impl VerdictApplier {
    pub fn new(store: Arc<dyn FindingStore>) -> Self {
        Self { store }
    }

    /// Apply `evaluations` to the findings of `task_id`.
    ///
    /// Invalid verdicts move the finding to `Disputed` and clear its
    /// severity. Valid verdicts leave the status alone and record the
    /// normalized severity. Every verdict also records the judge's comment.
    pub async fn apply(&self, task_id: &TaskId, evaluations: &[FindingEvaluation]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        for evaluation in evaluations {
            match self.apply_one(task_id, evaluation).await {
                Ok(Applied::Valid) => outcome.valid_count += 1,
                Ok(Applied::Disputed) => outcome.disputed_count += 1,
                Ok(Applied::KeptStatus) => outcome.kept_status_count += 1,
                Ok(Applied::Unknown) => {
                    tracing::warn!(
                        task_id = %task_id,
                        finding_id = %evaluation.finding_id,
                        "Verdict names an unknown finding"
                    );
                    outcome.unknown_count += 1;
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        finding_id = %evaluation.finding_id,
                        error = %e,
                        "Failed to apply verdict"
                    );
                    outcome.failed_count += 1;
                }
            }
        }

        tracing::info!(
            task_id = %task_id,
            valid = outcome.valid_count,
            disputed = outcome.disputed_count,
            failed = outcome.failed_count,
            unknown = outcome.unknown_count,
            "Verdicts applied"
        );
        outcome
    }

    async fn apply_one(
        &self,
        task_id: &TaskId,
        evaluation: &FindingEvaluation,
    ) -> ArbiterResult<Applied> {
        let Some(current) = self.store.get(task_id, evaluation.finding_id).await? else {
            return Ok(Applied::Unknown);
        };

        let comment = Some(Some(evaluation.comment.clone()));

        if evaluation.is_valid {
            let update = FindingUpdate {
                evaluated_severity: Some(Some(EvaluatedSeverity::normalize(&evaluation.severity))),
                evaluation_comment: comment,
                ..FindingUpdate::default()
            };
            self.store.update(task_id, current.id, update).await?;
            return Ok(Applied::Valid);
        }

        let can_dispute = current.status.can_transition_to(FindingStatus::Disputed);
        if !can_dispute {
            tracing::warn!(
                task_id = %task_id,
                finding_id = %current.id,
                status = %current.status,
                "Invalid verdict on a finding that cannot be disputed; keeping status"
            );
        }

        let update = FindingUpdate {
            status: can_dispute.then_some(FindingStatus::Disputed),
            evaluated_severity: Some(None),
            evaluation_comment: comment,
            ..FindingUpdate::default()
        };
        self.store.update(task_id, current.id, update).await?;

        Ok(if can_dispute {
            Applied::Disputed
        } else {
            Applied::KeptStatus
        })
    }
}

impl std::fmt::Debug for VerdictApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerdictApplier").finish_non_exhaustive()
    }
}
