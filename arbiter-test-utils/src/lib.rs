//! ARBITER Test Utilities
//!
//! Centralized test infrastructure for the ARBITER workspace:
//! - Scripted judge, recording delivery and a store with injected failures
//! - Proptest generators for findings and judge relationships
//! - Test fixtures for common scenarios
//! - Custom assertions for lifecycle invariants

// Re-export the in-memory store from its source crate
pub use arbiter_storage::InMemoryStore;

// Re-export core types for convenience
pub use arbiter_core::{
    AgentId, ArbiterConfig, ArbiterError, ArbiterResult, Delivery, DeliveryError,
    DuplicateRelationship, EvaluatedSeverity, Finding, FindingContent, FindingEvaluation,
    FindingId, FindingStatus, JudgeError, NewFinding, ReportedSeverity, RetryConfig,
    StorageError, SyncWatermark, TaskId, TaskSchedule, Timestamp, ValidationError,
};

use arbiter_llm::{Judge, JudgeResult};
use arbiter_storage::{FindingStore, FindingUpdate};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ============================================================================
// SCRIPTED JUDGE
// ============================================================================

/// Deterministic judge for tests.
///
/// `compare_all` returns the scripted relationships as-is, including ids
/// outside the input. `evaluate_batch` answers every input finding with its
/// scripted verdict, or valid/"Medium" when none was scripted. Clones share
/// call counters.
#[derive(Debug, Clone, Default)]
pub struct ScriptedJudge {
    relationships: Vec<DuplicateRelationship>,
    verdicts: HashMap<FindingId, (bool, String)>,
    omitted: HashSet<FindingId>,
    compare_error: Option<JudgeError>,
    evaluate_error: Option<JudgeError>,
    delay: Option<Duration>,
    compare_calls: Arc<AtomicUsize>,
    evaluate_calls: Arc<AtomicUsize>,
    evaluated: Arc<Mutex<Vec<Vec<FindingId>>>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relationships(mut self, relationships: Vec<DuplicateRelationship>) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn with_verdict(mut self, id: FindingId, is_valid: bool, severity: &str) -> Self {
        self.verdicts.insert(id, (is_valid, severity.to_string()));
        self
    }

    /// Leave `id` out of every evaluation answer.
    pub fn omit(mut self, id: FindingId) -> Self {
        self.omitted.insert(id);
        self
    }

    pub fn fail_compare(mut self, error: JudgeError) -> Self {
        self.compare_error = Some(error);
        self
    }

    pub fn fail_evaluate(mut self, error: JudgeError) -> Self {
        self.evaluate_error = Some(error);
        self
    }

    /// Sleep before answering either call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    pub fn evaluate_calls(&self) -> usize {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    /// Ids of every batch passed to `evaluate_batch`, in call order.
    pub fn evaluated_batches(&self) -> Vec<Vec<FindingId>> {
        self.evaluated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn compare_all(
        &self,
        _findings: &[FindingContent],
    ) -> JudgeResult<Vec<DuplicateRelationship>> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        match &self.compare_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.relationships.clone()),
        }
    }

    async fn evaluate_batch(
        &self,
        findings: &[FindingContent],
    ) -> JudgeResult<Vec<FindingEvaluation>> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        self.evaluated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(findings.iter().map(|f| f.id).collect());
        self.pause().await;

        if let Some(error) = &self.evaluate_error {
            return Err(error.clone());
        }

        Ok(findings
            .iter()
            .filter(|f| !self.omitted.contains(&f.id))
            .map(|f| {
                let (is_valid, severity) = self
                    .verdicts
                    .get(&f.id)
                    .cloned()
                    .unwrap_or_else(|| (true, "Medium".to_string()));
                FindingEvaluation {
                    finding_id: f.id,
                    is_valid,
                    severity,
                    comment: format!("Scripted verdict for '{}'", f.title),
                }
            })
            .collect())
    }
}

// ============================================================================
// RECORDING DELIVERY
// ============================================================================

/// One call to `RecordingDelivery::post`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub finding_ids: Vec<FindingId>,
    pub accepted: bool,
}

/// Delivery double that records every post.
///
/// Fails the first `fail_times` posts with a transport error, then accepts
/// (or rejects, when built with `rejecting`). Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelivery {
    reject: bool,
    failures_left: Arc<AtomicU32>,
    posts: Arc<Mutex<Vec<RecordedPost>>>,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend answers every post with a definite rejection.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn fail_times(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    /// Every post attempt, including failed ones.
    pub fn post_count(&self) -> usize {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Posts the backend accepted.
    pub fn accepted_posts(&self) -> Vec<RecordedPost> {
        self.posts().into_iter().filter(|p| p.accepted).collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn post(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        findings: &[Finding],
    ) -> ArbiterResult<bool> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        let accepted = !failing && !self.reject;

        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedPost {
                task_id: task_id.clone(),
                agent_id: agent_id.clone(),
                finding_ids: findings.iter().map(|f| f.id).collect(),
                accepted,
            });

        if failing {
            return Err(ArbiterError::Delivery(DeliveryError::Transport {
                reason: "injected transport failure".to_string(),
            }));
        }
        Ok(accepted)
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// Finding store that delegates to an `InMemoryStore` and fails chosen
/// operations.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_updates: HashSet<FindingId>,
    fail_reads: bool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failing_updates: HashSet::new(),
            fail_reads: false,
        }
    }

    /// Fail every update of these findings.
    pub fn fail_updates_for(mut self, ids: impl IntoIterator<Item = FindingId>) -> Self {
        self.failing_updates.extend(ids);
        self
    }

    /// Fail every list operation.
    pub fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    fn check_read(&self) -> ArbiterResult<()> {
        if self.fail_reads {
            return Err(ArbiterError::Storage(StorageError::Unavailable {
                reason: "injected read failure".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl FindingStore for FlakyStore {
    async fn insert(&self, finding: &Finding) -> ArbiterResult<()> {
        self.inner.insert(finding).await
    }

    async fn insert_batch(&self, findings: &[Finding]) -> ArbiterResult<()> {
        self.inner.insert_batch(findings).await
    }

    async fn insert_submission(&self, findings: Vec<Finding>) -> ArbiterResult<Vec<Finding>> {
        self.inner.insert_submission(findings).await
    }

    async fn update(
        &self,
        task_id: &TaskId,
        id: FindingId,
        update: FindingUpdate,
    ) -> ArbiterResult<Finding> {
        if self.failing_updates.contains(&id) {
            return Err(ArbiterError::Storage(StorageError::UpdateFailed {
                id,
                reason: "injected update failure".to_string(),
            }));
        }
        self.inner.update(task_id, id, update).await
    }

    async fn get(&self, task_id: &TaskId, id: FindingId) -> ArbiterResult<Option<Finding>> {
        self.inner.get(task_id, id).await
    }

    async fn list_by_status(
        &self,
        task_id: &TaskId,
        status: FindingStatus,
    ) -> ArbiterResult<Vec<Finding>> {
        self.check_read()?;
        self.inner.list_by_status(task_id, status).await
    }

    async fn list_all(&self, task_id: &TaskId) -> ArbiterResult<Vec<Finding>> {
        self.check_read()?;
        self.inner.list_all(task_id).await
    }

    async fn list_by_agent_since(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        since: Option<Timestamp>,
    ) -> ArbiterResult<Vec<Finding>> {
        self.check_read()?;
        self.inner.list_by_agent_since(task_id, agent_id, since).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for findings and judge output.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use proptest::sample::Index;
    use uuid::Uuid;

    /// Agents drawn from a small pool so same-agent groups are common.
    pub const AGENT_POOL: [&str; 4] = ["agent-0", "agent-1", "agent-2", "agent-3"];

    /// Generate a random FindingId.
    pub fn arb_finding_id() -> impl Strategy<Value = FindingId> {
        any::<[u8; 16]>().prop_map(|bytes| FindingId::from_uuid(Uuid::from_bytes(bytes)))
    }

    pub fn arb_agent_id() -> impl Strategy<Value = AgentId> {
        prop::sample::select(AGENT_POOL.to_vec()).prop_map(AgentId::from)
    }

    pub fn arb_reported_severity() -> impl Strategy<Value = ReportedSeverity> {
        prop_oneof![
            Just(ReportedSeverity::High),
            Just(ReportedSeverity::Medium),
            Just(ReportedSeverity::Low),
            Just(ReportedSeverity::Info),
        ]
    }

    pub fn arb_finding_status() -> impl Strategy<Value = FindingStatus> {
        prop::sample::select(FindingStatus::ALL.to_vec())
    }

    /// Free-form severity text as a judge might write it.
    pub fn arb_severity_text() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Low".to_string()),
            Just("medium".to_string()),
            Just("HIGH".to_string()),
            Just("critical".to_string()),
            Just("trivial".to_string()),
            "[a-z ]{0,12}",
        ]
    }

    pub fn arb_new_finding() -> impl Strategy<Value = NewFinding> {
        (
            "[A-Za-z][A-Za-z ]{2,30}",
            "[A-Za-z][A-Za-z .]{10,80}",
            arb_reported_severity(),
            prop::collection::vec("src/[a-z]{1,8}\\.rs", 0..3),
        )
            .prop_map(|(title, description, reported_severity, file_references)| NewFinding {
                title,
                description,
                reported_severity,
                file_references,
            })
    }

    /// Between 1 and `max` pending findings of task "task-prop", created in
    /// order within the past hour.
    pub fn arb_pending_findings(max: usize) -> impl Strategy<Value = Vec<Finding>> {
        prop::collection::vec((arb_agent_id(), arb_new_finding()), 1..=max.max(1)).prop_map(
            |specs| {
                let base = Utc::now() - chrono::Duration::hours(1);
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (agent_id, new))| {
                        Finding::from_submission(
                            TaskId::from("task-prop"),
                            agent_id,
                            1,
                            new,
                            base + chrono::Duration::milliseconds(i as i64),
                        )
                    })
                    .collect()
            },
        )
    }

    /// Pending findings plus raw judge relationships over them.
    ///
    /// Relationships are unvalidated: self references, chains, conflicting
    /// originals and ids outside the input all occur.
    pub fn arb_findings_with_relationships(
        max: usize,
    ) -> impl Strategy<Value = (Vec<Finding>, Vec<DuplicateRelationship>)> {
        arb_pending_findings(max)
            .prop_flat_map(|findings| {
                let picks = prop::collection::vec(
                    (any::<Index>(), any::<Index>(), 0u8..10),
                    0..=findings.len() * 2,
                );
                (Just(findings), picks)
            })
            .prop_map(|(findings, picks)| {
                let relationships = picks
                    .into_iter()
                    .map(|(from, to, kind)| {
                        let finding_id = findings[from.index(findings.len())].id;
                        let duplicate_of = if kind == 0 {
                            FindingId::now_v7()
                        } else {
                            findings[to.index(findings.len())].id
                        };
                        DuplicateRelationship {
                            finding_id,
                            duplicate_of,
                            explanation: format!("Candidate {}", kind),
                        }
                    })
                    .collect();
                (findings, relationships)
            })
    }

    /// Pending findings plus a judge verdict for each of them.
    pub fn arb_findings_with_verdicts(
        max: usize,
    ) -> impl Strategy<Value = (Vec<Finding>, Vec<FindingEvaluation>)> {
        arb_pending_findings(max)
            .prop_flat_map(|findings| {
                let verdicts =
                    prop::collection::vec((any::<bool>(), arb_severity_text()), findings.len());
                (Just(findings), verdicts)
            })
            .prop_map(|(findings, verdicts)| {
                let evaluations = findings
                    .iter()
                    .zip(verdicts)
                    .map(|(f, (is_valid, severity))| FindingEvaluation {
                        finding_id: f.id,
                        is_valid,
                        severity,
                        comment: "generated".to_string(),
                    })
                    .collect();
                (findings, evaluations)
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::Utc;

    pub fn task_id(id: &str) -> TaskId {
        TaskId::from(id)
    }

    pub fn agent_id(id: &str) -> AgentId {
        AgentId::from(id)
    }

    /// Submitted content with a recognisable title.
    pub fn new_finding(title: &str) -> NewFinding {
        NewFinding {
            title: title.to_string(),
            description: format!("{} can be triggered by an unauthenticated caller", title),
            reported_severity: ReportedSeverity::Medium,
            file_references: vec!["contracts/Vault.sol".to_string()],
        }
    }

    /// One pending finding per entry of `agents`, in order.
    ///
    /// `created_at` starts an hour in the past and increases by a
    /// millisecond per finding, so watermarks taken "now" cover all of them.
    pub fn pending_findings(task: &str, agents: &[&str]) -> Vec<Finding> {
        let base = Utc::now() - chrono::Duration::hours(1);
        agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                Finding::from_submission(
                    task_id(task),
                    agent_id(agent),
                    1,
                    new_finding(&format!("Finding {}", i)),
                    base + chrono::Duration::milliseconds(i as i64),
                )
            })
            .collect()
    }

    /// Duplicate claim with a fixed explanation.
    pub fn relationship(finding_id: FindingId, duplicate_of: FindingId) -> DuplicateRelationship {
        DuplicateRelationship {
            finding_id,
            duplicate_of,
            explanation: "Same root cause".to_string(),
        }
    }

    /// Window open from an hour ago until `deadline_in` from now.
    pub fn open_schedule(task: &str, deadline_in: chrono::Duration) -> TaskSchedule {
        let now = Utc::now();
        TaskSchedule {
            task_id: task_id(task),
            start_time: now - chrono::Duration::hours(1),
            deadline: now + deadline_in,
        }
    }

    /// Defaults with no delivery retries and a short judge timeout.
    pub fn test_config() -> ArbiterConfig {
        ArbiterConfig {
            judge_timeout: Duration::from_secs(5),
            evaluation_concurrency: 2,
            delivery_retry: RetryConfig::none(),
            ..ArbiterConfig::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for lifecycle invariants.

    use super::*;

    /// Assert that a finding has the expected status.
    #[track_caller]
    pub fn assert_status(finding: &Finding, expected: FindingStatus) {
        assert_eq!(
            finding.status, expected,
            "Status mismatch for '{}': expected {:?}, got {:?}",
            finding.title, expected, finding.status
        );
    }

    /// Assert that an ArbiterResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ArbiterResult<T>) {
        match result {
            Err(ArbiterError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that an ArbiterResult is a Delivery error.
    #[track_caller]
    pub fn assert_delivery_error<T: std::fmt::Debug>(result: &ArbiterResult<T>) {
        match result {
            Err(ArbiterError::Delivery(_)) => {}
            other => panic!("Expected Delivery error, got: {:?}", other),
        }
    }

    /// Assert that stored duplicate links form depth-one groups: every
    /// `duplicate_of` names another finding of the set that is not itself a
    /// duplicate.
    #[track_caller]
    pub fn assert_depth_one(findings: &[Finding]) {
        let by_id: HashMap<FindingId, &Finding> = findings.iter().map(|f| (f.id, f)).collect();
        for finding in findings {
            let Some(original) = finding.duplicate_of else {
                continue;
            };
            assert_ne!(original, finding.id, "'{}' points at itself", finding.title);
            let target = by_id
                .get(&original)
                .unwrap_or_else(|| panic!("'{}' points outside the task", finding.title));
            assert!(
                target.duplicate_of.is_none(),
                "'{}' points at '{}', which is itself a duplicate",
                finding.title,
                target.title
            );
        }
    }

    /// Assert that no finding is left pending.
    #[track_caller]
    pub fn assert_none_pending(findings: &[Finding]) {
        let pending: Vec<&str> = findings
            .iter()
            .filter(|f| f.status == FindingStatus::Pending)
            .map(|f| f.title.as_str())
            .collect();
        assert!(pending.is_empty(), "Findings left pending: {:?}", pending);
    }
}

// ============================================================================
// TESTS
// ============================================================================
