//! Core entity structures

use crate::{
    AgentId, EvaluatedSeverity, FindingId, FindingStatus, ReportedSeverity, TaskId, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Finding - a single security issue reported by an agent for a task.
///
/// Created `Pending` by the intake boundary, mutated only through the
/// store's point updates. `duplicate_of` is a back-reference only; groups
/// are reconstructed from it, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,
    pub task_id: TaskId,
    pub agent_id: AgentId,
    /// Sequential per (task, agent); shared by findings submitted together.
    pub submission_batch_id: u64,
    pub title: String,
    pub description: String,
    pub reported_severity: ReportedSeverity,
    pub file_references: Vec<String>,
    pub status: FindingStatus,
    pub evaluated_severity: Option<EvaluatedSeverity>,
    pub evaluation_comment: Option<String>,
    pub deduplication_comment: Option<String>,
    pub duplicate_of: Option<FindingId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Finding {
    /// Build a pending finding from submitted content.
    pub fn from_submission(
        task_id: TaskId,
        agent_id: AgentId,
        submission_batch_id: u64,
        submitted: NewFinding,
        now: Timestamp,
    ) -> Self {
        Self {
            id: FindingId::now_v7(),
            task_id,
            agent_id,
            submission_batch_id,
            title: submitted.title,
            description: submitted.description,
            reported_severity: submitted.reported_severity,
            file_references: submitted.file_references,
            status: FindingStatus::Pending,
            evaluated_severity: None,
            evaluation_comment: None,
            deduplication_comment: None,
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The judge-facing view of this finding.
    pub fn content(&self) -> FindingContent {
        FindingContent {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            reported_severity: self.reported_severity,
            file_references: self.file_references.clone(),
        }
    }
}

/// Content portion of a finding as submitted by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFinding {
    pub title: String,
    pub description: String,
    #[serde(alias = "severity")]
    pub reported_severity: ReportedSeverity,
    #[serde(default, alias = "file_paths")]
    pub file_references: Vec<String>,
}

/// What the judge sees of a finding: identity plus content, no lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingContent {
    pub id: FindingId,
    pub title: String,
    pub description: String,
    pub reported_severity: ReportedSeverity,
    pub file_references: Vec<String>,
}

/// Judge claim that `finding_id` duplicates `duplicate_of`.
///
/// Ephemeral per cycle. Only ids from the judged input are meaningful;
/// anything else is dropped during validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRelationship {
    pub finding_id: FindingId,
    pub duplicate_of: FindingId,
    pub explanation: String,
}

/// Raw validity verdict from the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingEvaluation {
    pub finding_id: FindingId,
    pub is_valid: bool,
    /// Free-form text, normalized by `EvaluatedSeverity::normalize`.
    pub severity: String,
    pub comment: String,
}

/// Last successful delivery time for one (task, agent) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub last_synced_at: Timestamp,
}

/// Submission window of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub task_id: TaskId,
    pub start_time: Timestamp,
    pub deadline: Timestamp,
}

impl TaskSchedule {
    /// Whether `at` falls inside `[start_time, deadline]`.
    pub fn accepts_at(&self, at: Timestamp) -> bool {
        at >= self.start_time && at <= self.deadline
    }
}
