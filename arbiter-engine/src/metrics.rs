//! Cycle metrics

use crate::report::CycleReport;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters across every cycle run by one `CycleRunner`.
#[derive(Debug, Default)]
pub struct CycleMetrics {
    /// Cycles that ran to completion
    pub cycles_completed: AtomicU64,

    /// Cycles skipped because the task was already processed or in flight
    pub cycles_skipped: AtomicU64,

    /// Cycles that aborted on a store error
    pub cycles_failed: AtomicU64,

    /// Pending findings picked up by completed cycles
    pub findings_processed: AtomicU64,

    /// Judge relationships dropped during validation
    pub relationships_dropped: AtomicU64,

    /// Deduplication passes that fell back to "no duplicates"
    pub judge_degraded: AtomicU64,

    /// Findings moved to disputed
    pub findings_disputed: AtomicU64,

    /// Findings left pending by an inconsistent graph
    pub inconsistent_findings: AtomicU64,

    /// Store writes that failed
    pub write_failures: AtomicU64,

    /// Agents whose delivery failed after retries
    pub delivery_failures: AtomicU64,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a completed cycle's report into the counters.
    pub fn record(&self, report: &CycleReport) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.findings_processed
            .fetch_add(report.pending_found as u64, Ordering::Relaxed);
        self.relationships_dropped
            .fetch_add(report.relationships_dropped as u64, Ordering::Relaxed);
        if report.judge_error.is_some() {
            self.judge_degraded.fetch_add(1, Ordering::Relaxed);
        }
        self.findings_disputed
            .fetch_add(report.verdicts.disputed_count as u64, Ordering::Relaxed);
        self.inconsistent_findings
            .fetch_add(report.inconsistent as u64, Ordering::Relaxed);
        self.write_failures
            .fetch_add(report.write_failures() as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.delivery_failures as u64, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> CycleMetricsSnapshot {
        CycleMetricsSnapshot {
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            findings_processed: self.findings_processed.load(Ordering::Relaxed),
            relationships_dropped: self.relationships_dropped.load(Ordering::Relaxed),
            judge_degraded: self.judge_degraded.load(Ordering::Relaxed),
            findings_disputed: self.findings_disputed.load(Ordering::Relaxed),
            inconsistent_findings: self.inconsistent_findings.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of cycle metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CycleMetricsSnapshot {
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub findings_processed: u64,
    pub relationships_dropped: u64,
    pub judge_degraded: u64,
    pub findings_disputed: u64,
    pub inconsistent_findings: u64,
    pub write_failures: u64,
    pub delivery_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveErrorKind;
    use crate::verdict::ApplyOutcome;
    use arbiter_core::TaskId;

    #[test]
    fn test_record_accumulates() {
        let metrics = CycleMetrics::new();
        let report = CycleReport {
            pending_found: 4,
            relationships_dropped: 1,
            judge_error: Some(ResolveErrorKind::JudgeMalformed),
            inconsistent: 1,
            verdicts: ApplyOutcome {
                disputed_count: 2,
                failed_count: 1,
                ..ApplyOutcome::default()
            },
            delivery_failures: 1,
            ..CycleReport::new(TaskId::from("t1"))
        };

        metrics.record(&report);
        metrics.record(&report);
        metrics.record_skipped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles_completed, 2);
        assert_eq!(snapshot.cycles_skipped, 1);
        assert_eq!(snapshot.findings_processed, 8);
        assert_eq!(snapshot.relationships_dropped, 2);
        assert_eq!(snapshot.judge_degraded, 2);
        assert_eq!(snapshot.findings_disputed, 4);
        assert_eq!(snapshot.inconsistent_findings, 2);
        assert_eq!(snapshot.write_failures, 2);
        assert_eq!(snapshot.delivery_failures, 2);
    }
}
