//! Cycle reports and task summaries

use crate::resolver::ResolveErrorKind;
use crate::verdict::ApplyOutcome;
use arbiter_core::{Finding, FindingId, FindingStatus, TaskId, Timestamp};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// CYCLE REPORT
// ============================================================================

/// What one processing cycle did. Partial failures show up as counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub task_id: TaskId,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,

    /// Pending findings picked up at the start of the cycle
    pub pending_found: usize,

    // Deduplication
    pub relationships: usize,
    pub relationships_dropped: usize,
    pub judge_error: Option<ResolveErrorKind>,

    // Status assignment
    pub statuses_assigned: usize,
    /// Findings left pending because the graph contradicted itself
    pub inconsistent: usize,
    pub status_write_failures: usize,

    // Evaluation
    pub batches: usize,
    /// Batches whose judge call failed or timed out
    pub evaluation_failures: usize,
    /// Findings that received no verdict
    pub unevaluated: usize,
    pub verdicts: ApplyOutcome,

    // Delivery
    pub agents_delivered: usize,
    pub delivery_failures: usize,
    /// Agents held back because one of their findings kept no status
    pub deliveries_deferred: usize,

    /// Whether the processed marker was written
    pub marked_processed: bool,
}

impl CycleReport {
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            started_at: now,
            finished_at: now,
            pending_found: 0,
            relationships: 0,
            relationships_dropped: 0,
            judge_error: None,
            statuses_assigned: 0,
            inconsistent: 0,
            status_write_failures: 0,
            batches: 0,
            evaluation_failures: 0,
            unevaluated: 0,
            verdicts: ApplyOutcome::default(),
            agents_delivered: 0,
            delivery_failures: 0,
            deliveries_deferred: 0,
            marked_processed: false,
        }
    }

    /// Store writes that failed in either phase.
    pub fn write_failures(&self) -> usize {
        self.status_write_failures + self.verdicts.failed_count
    }

    /// Whether every phase ran without a partial failure.
    pub fn is_clean(&self) -> bool {
        self.judge_error.is_none()
            && self.relationships_dropped == 0
            && self.inconsistent == 0
            && self.write_failures() == 0
            && self.evaluation_failures == 0
            && self.unevaluated == 0
            && self.delivery_failures == 0
            && self.deliveries_deferred == 0
    }
}

// ============================================================================
// TASK SUMMARY
// ============================================================================

/// An original and the findings recorded as its duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroupSummary {
    pub original: FindingId,
    pub duplicates: Vec<FindingId>,
}

/// Totals and distributions for one task's findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub total_findings: usize,
    /// Findings credited to their agents (unique, best or similar valid)
    pub credited_findings: usize,
    /// Every status, including those with no findings
    pub status_distribution: BTreeMap<&'static str, usize>,
    pub severity_distribution: BTreeMap<&'static str, usize>,
    pub unevaluated: usize,
    pub duplicate_groups: Vec<DuplicateGroupSummary>,
    pub generated_at: Timestamp,
}

/// Summarize a task's findings.
///
/// Duplicate groups are rebuilt from `duplicate_of`, ordered by the
/// original's position in `findings`.
pub fn summarize(task_id: &TaskId, findings: &[Finding]) -> TaskSummary {
    let mut status_distribution: BTreeMap<&'static str, usize> = FindingStatus::ALL
        .iter()
        .map(|s| (s.as_db_str(), 0))
        .collect();
    let mut severity_distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut unevaluated = 0;

    for finding in findings {
        *status_distribution
            .entry(finding.status.as_db_str())
            .or_default() += 1;
        match finding.evaluated_severity {
            Some(severity) => *severity_distribution.entry(severity.as_db_str()).or_default() += 1,
            None => unevaluated += 1,
        }
    }

    let mut duplicates_by_original: BTreeMap<FindingId, Vec<FindingId>> = BTreeMap::new();
    for finding in findings {
        if let Some(original) = finding.duplicate_of {
            duplicates_by_original
                .entry(original)
                .or_default()
                .push(finding.id);
        }
    }

    let duplicate_groups = findings
        .iter()
        .filter_map(|f| {
            duplicates_by_original
                .remove(&f.id)
                .map(|duplicates| DuplicateGroupSummary {
                    original: f.id,
                    duplicates,
                })
        })
        .collect();

    TaskSummary {
        task_id: task_id.clone(),
        total_findings: findings.len(),
        credited_findings: findings.iter().filter(|f| f.status.is_credited()).count(),
        status_distribution,
        severity_distribution,
        unevaluated,
        duplicate_groups,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::EvaluatedSeverity;
    use arbiter_test_utils::fixtures;

    #[test]
    fn test_summarize_counts_and_groups() {
        let mut findings = fixtures::pending_findings("t1", &["a1", "a2", "a3", "a1"]);
        let original = findings[0].id;
        findings[0].status = FindingStatus::BestValid;
        findings[0].evaluated_severity = Some(EvaluatedSeverity::High);
        findings[1].status = FindingStatus::SimilarValid;
        findings[1].duplicate_of = Some(original);
        findings[1].evaluated_severity = Some(EvaluatedSeverity::High);
        findings[2].status = FindingStatus::Disputed;
        findings[3].status = FindingStatus::AlreadyReported;
        findings[3].duplicate_of = Some(original);

        let summary = summarize(&fixtures::task_id("t1"), &findings);

        assert_eq!(summary.total_findings, 4);
        assert_eq!(summary.credited_findings, 2);
        assert_eq!(summary.status_distribution["best_valid"], 1);
        assert_eq!(summary.status_distribution["pending"], 0);
        assert_eq!(summary.status_distribution.len(), FindingStatus::ALL.len());
        assert_eq!(summary.severity_distribution["High"], 2);
        assert_eq!(summary.unevaluated, 2);
        assert_eq!(
            summary.duplicate_groups,
            vec![DuplicateGroupSummary {
                original,
                duplicates: vec![findings[1].id, findings[3].id],
            }]
        );
    }

    #[test]
    fn test_summarize_empty_task() {
        let summary = summarize(&fixtures::task_id("t1"), &[]);
        assert_eq!(summary.total_findings, 0);
        assert!(summary.duplicate_groups.is_empty());
        assert!(summary.severity_distribution.is_empty());
    }

    #[test]
    fn test_clean_report() {
        let mut report = CycleReport::new(fixtures::task_id("t1"));
        assert!(report.is_clean());
        report.verdicts.failed_count = 1;
        report.status_write_failures = 2;
        assert_eq!(report.write_failures(), 3);
        assert!(!report.is_clean());
    }
}
