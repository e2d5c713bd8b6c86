//! Processing cycle
//!
//! One cycle takes a task's pending findings through deduplication, status
//! assignment, batched evaluation, verdict application and delivery. The
//! phases run in that order; only the evaluation judge calls run
//! concurrently, bounded by `evaluation_concurrency`.
//!
//! A cycle is guarded twice: the persisted processed marker makes a task
//! run at most once, and an in-process in-flight set turns away a second
//! concurrent run for the same task before the marker exists.

use crate::batcher::{self, BatchVerdict, EvaluationBatch};
use crate::metrics::CycleMetrics;
use crate::report::{self, CycleReport, TaskSummary};
use crate::resolver::DuplicateResolver;
use crate::status;
use crate::sync::{DeliveryOutcome, SyncTracker};
use crate::verdict::VerdictApplier;
use arbiter_core::{
    AgentId, ArbiterConfig, ArbiterResult, Delivery, Finding, FindingId, FindingStatus, TaskId,
};
use arbiter_llm::{Judge, JudgeRegistry};
use arbiter_storage::{FindingStore, FindingUpdate, MetadataStore, ProcessedMarker};
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

// ============================================================================
// OUTCOME
// ============================================================================

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The processed marker already exists.
    AlreadyProcessed,
    /// Another cycle for the task is running in this process.
    InFlight,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    Skipped { task_id: TaskId, reason: SkipReason },
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

// ============================================================================
// IN-FLIGHT GUARD
// ============================================================================

type InFlight = Arc<Mutex<HashSet<TaskId>>>;

/// Holds a task's in-flight slot; released on drop, including when the
/// cycle future is abandoned.
struct InFlightGuard {
    in_flight: InFlight,
    task_id: TaskId,
}

impl InFlightGuard {
    fn acquire(in_flight: &InFlight, task_id: &TaskId) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.clone());
        inserted.then(|| Self {
            in_flight: in_flight.clone(),
            task_id: task_id.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs processing cycles against one store and one set of judges.
///
/// Cheap to clone; clones share the in-flight set and metrics.
#[derive(Clone)]
pub struct CycleRunner {
    findings: Arc<dyn FindingStore>,
    metadata: Arc<dyn MetadataStore>,
    judges: Arc<JudgeRegistry>,
    delivery: Option<Arc<dyn Delivery>>,
    config: ArbiterConfig,
    in_flight: InFlight,
    metrics: Arc<CycleMetrics>,
}

impl CycleRunner {
    pub fn new(
        findings: Arc<dyn FindingStore>,
        metadata: Arc<dyn MetadataStore>,
        judges: JudgeRegistry,
        config: ArbiterConfig,
    ) -> Self {
        Self {
            findings,
            metadata,
            judges: Arc::new(judges),
            delivery: None,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            metrics: Arc::new(CycleMetrics::new()),
        }
    }

    /// Deliver each agent's findings after evaluation.
    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn metrics(&self) -> Arc<CycleMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn sync_tracker(&self) -> SyncTracker {
        SyncTracker::new(
            self.findings.clone(),
            self.metadata.clone(),
            self.config.delivery_retry.clone(),
        )
    }

    /// Summarize every finding of the task as currently stored.
    pub async fn summarize_task(&self, task_id: &TaskId) -> ArbiterResult<TaskSummary> {
        let findings = self.findings.list_all(task_id).await?;
        Ok(report::summarize(task_id, &findings))
    }

    /// Run one cycle for `task_id`.
    ///
    /// Skips when the task is already processed or in flight. Judge and
    /// delivery failures degrade into report counts; only store errors on
    /// the reads that drive the cycle, or on the final marker write, abort
    /// it. An aborted cycle leaves no marker and can be rerun; so does one
    /// in which a status write failed.
    pub async fn run(&self, task_id: &TaskId) -> ArbiterResult<CycleOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, task_id) else {
            tracing::info!(task_id = %task_id, "Cycle already in flight; skipping");
            self.metrics.record_skipped();
            return Ok(CycleOutcome::Skipped {
                task_id: task_id.clone(),
                reason: SkipReason::InFlight,
            });
        };

        if let Some(marker) = self.metadata.get_processed_marker(task_id).await? {
            tracing::info!(
                task_id = %task_id,
                processed_at = %marker.processed_at,
                "Task already processed; skipping"
            );
            self.metrics.record_skipped();
            return Ok(CycleOutcome::Skipped {
                task_id: task_id.clone(),
                reason: SkipReason::AlreadyProcessed,
            });
        }

        match self.run_cycle(task_id).await {
            Ok(report) => {
                self.metrics.record(&report);
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Cycle aborted");
                self.metrics.record_failed();
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, task_id: &TaskId) -> ArbiterResult<CycleReport> {
        let mut report = CycleReport::new(task_id.clone());

        let pending = self
            .findings
            .list_by_status(task_id, FindingStatus::Pending)
            .await?;
        report.pending_found = pending.len();
        tracing::info!(task_id = %task_id, pending = pending.len(), "Cycle started");

        if !pending.is_empty() {
            self.process(task_id, &pending, &mut report).await?;
        }

        // A finding whose status write failed is still pending; leaving the
        // marker unset lets the next run pick it up.
        if report.status_write_failures == 0 {
            self.metadata
                .set_processed_marker(&ProcessedMarker {
                    task_id: task_id.clone(),
                    processed_at: Utc::now(),
                    finding_count: pending.len(),
                })
                .await?;
            report.marked_processed = true;
        } else {
            tracing::warn!(
                task_id = %task_id,
                failed = report.status_write_failures,
                "Status writes failed; task left unmarked for a rerun"
            );
        }

        report.finished_at = Utc::now();
        tracing::info!(
            task_id = %task_id,
            pending = report.pending_found,
            relationships = report.relationships,
            dropped = report.relationships_dropped,
            inconsistent = report.inconsistent,
            valid = report.verdicts.valid_count,
            disputed = report.verdicts.disputed_count,
            unevaluated = report.unevaluated,
            delivery_failures = report.delivery_failures,
            "Cycle completed"
        );
        Ok(report)
    }

    async fn process(
        &self,
        task_id: &TaskId,
        pending: &[Finding],
        report: &mut CycleReport,
    ) -> ArbiterResult<()> {
        // Deduplication
        let dedup_judge: Arc<dyn Judge> = self.judges.clone();
        let resolution = DuplicateResolver::new(dedup_judge, self.config.judge_timeout)
            .resolve(pending)
            .await;
        report.relationships = resolution.relationships.len();
        report.relationships_dropped = resolution.dropped_count();
        report.judge_error = resolution.error;

        // Status assignment
        let graph = resolution.graph();
        let mut unwritten: HashSet<FindingId> = HashSet::new();
        for (id, decision) in status::assign_statuses(pending, &graph) {
            if decision.inconsistent {
                report.inconsistent += 1;
                continue;
            }
            let update = FindingUpdate {
                status: Some(decision.status),
                deduplication_comment: Some(decision.comment),
                duplicate_of: graph.original_of(id).map(Some),
                ..FindingUpdate::default()
            };
            match self.findings.update(task_id, id, update).await {
                Ok(_) => report.statuses_assigned += 1,
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        finding_id = %id,
                        error = %e,
                        "Failed to write status"
                    );
                    report.status_write_failures += 1;
                    unwritten.insert(id);
                }
            }
        }

        // Evaluation, against the findings as now stored. Findings still
        // waiting for their status are left to the rerun.
        let pending_ids: HashSet<FindingId> = pending
            .iter()
            .map(|f| f.id)
            .filter(|id| !unwritten.contains(id))
            .collect();
        let current: Vec<Finding> = self
            .findings
            .list_all(task_id)
            .await?
            .into_iter()
            .filter(|f| pending_ids.contains(&f.id))
            .collect();

        let batches = batcher::group_for_evaluation(
            &current,
            &resolution.relationships,
            self.config.max_batch_size,
        );
        report.batches = batches.len();

        let semaphore = Semaphore::new(self.config.evaluation_concurrency.max(1));
        let verdicts = join_all(
            batches
                .iter()
                .map(|batch| self.evaluate(task_id, batch, &semaphore)),
        )
        .await;

        let mut evaluations = Vec::new();
        for (batch, verdict) in batches.iter().zip(verdicts) {
            match verdict {
                Some(verdict) => {
                    report.unevaluated += verdict.missing.len();
                    evaluations.extend(verdict.evaluations);
                }
                None => {
                    report.evaluation_failures += 1;
                    report.unevaluated += batch.len();
                }
            }
        }

        report.verdicts = VerdictApplier::new(self.findings.clone())
            .apply(task_id, &evaluations)
            .await;

        // Delivery
        self.deliver(task_id, pending, &unwritten, report).await;
        Ok(())
    }

    /// Judge one batch. `None` when the judge failed or timed out.
    async fn evaluate(
        &self,
        task_id: &TaskId,
        batch: &EvaluationBatch,
        semaphore: &Semaphore,
    ) -> Option<BatchVerdict> {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Evaluation semaphore closed");
                return None;
            }
        };

        let contents: Vec<_> = batch.members().iter().map(Finding::content).collect();
        let answer = tokio::time::timeout(
            self.config.judge_timeout,
            self.judges.evaluate_batch(&contents),
        )
        .await;

        match answer {
            Ok(Ok(evaluations)) => {
                let verdict = batcher::reconcile_batch(batch, evaluations);
                if !verdict.missing.is_empty() || verdict.discarded > 0 {
                    tracing::warn!(
                        task_id = %task_id,
                        batch_size = batch.len(),
                        missing = verdict.missing.len(),
                        discarded = verdict.discarded,
                        "Evaluation answer did not match the batch"
                    );
                }
                Some(verdict)
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    task_id = %task_id,
                    batch_size = batch.len(),
                    error = %e,
                    "Evaluation judge failed; batch left without verdict"
                );
                None
            }
            Err(_) => {
                tracing::warn!(
                    task_id = %task_id,
                    batch_size = batch.len(),
                    timeout_ms = self.config.judge_timeout.as_millis() as u64,
                    "Evaluation judge timed out; batch left without verdict"
                );
                None
            }
        }
    }

    /// Deliver per agent. An agent with a finding in `unwritten` is held
    /// back entirely so its watermark stays behind that finding.
    async fn deliver(
        &self,
        task_id: &TaskId,
        pending: &[Finding],
        unwritten: &HashSet<FindingId>,
        report: &mut CycleReport,
    ) {
        let Some(delivery) = &self.delivery else {
            tracing::debug!(task_id = %task_id, "No delivery configured; skipping");
            return;
        };

        let held: HashSet<&AgentId> = pending
            .iter()
            .filter(|f| unwritten.contains(&f.id))
            .map(|f| &f.agent_id)
            .collect();

        let mut agents: Vec<&AgentId> = Vec::new();
        for finding in pending {
            if !agents.contains(&&finding.agent_id) {
                agents.push(&finding.agent_id);
            }
        }

        let sync = self.sync_tracker();
        for agent_id in agents {
            if held.contains(agent_id) {
                tracing::warn!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    "Agent has findings without a status; delivery deferred"
                );
                report.deliveries_deferred += 1;
                continue;
            }
            match sync.deliver(task_id, agent_id, delivery.as_ref()).await {
                Ok(DeliveryOutcome::Delivered { .. }) => report.agents_delivered += 1,
                Ok(DeliveryOutcome::NothingPending) => {}
                Err(e) => {
                    tracing::error!(
                        task_id = %task_id,
                        agent_id = %agent_id,
                        error = %e,
                        "Delivery failed; watermark not advanced"
                    );
                    report.delivery_failures += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for CycleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleRunner")
            .field("judges", &self.judges)
            .field("delivery", &self.delivery.is_some())
            .field("max_batch_size", &self.config.max_batch_size)
            .field("evaluation_concurrency", &self.config.evaluation_concurrency)
            .finish_non_exhaustive()
    }
}
