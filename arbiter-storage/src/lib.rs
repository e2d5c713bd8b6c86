//! ARBITER Storage - Store Traits and In-Memory Implementation
//!
//! Findings live in one collection per task; small bookkeeping documents
//! (processed markers, sync watermarks, submission counters) live in a
//! shared metadata collection addressed by the composite keys in [`keys`].
//! Every write is a single-document point update.

pub mod keys;
mod memory;

pub use memory::InMemoryStore;

use arbiter_core::{
    AgentId, ArbiterResult, EvaluatedSeverity, Finding, FindingId, FindingStatus, SyncWatermark,
    TaskId, Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// UPDATE TYPES
// ============================================================================

/// Partial update payload for findings.
///
/// Nullable fields use `Option<Option<T>>`: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindingUpdate {
    /// New lifecycle status (must be a legal transition)
    pub status: Option<FindingStatus>,
    pub evaluated_severity: Option<Option<EvaluatedSeverity>>,
    pub evaluation_comment: Option<Option<String>>,
    pub deduplication_comment: Option<Option<String>>,
    /// Must reference another finding in the same task
    pub duplicate_of: Option<Option<FindingId>>,
}

impl FindingUpdate {
    /// Whether applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self == &FindingUpdate::default()
    }
}

/// Written once a task's processing cycle completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub task_id: TaskId,
    pub processed_at: Timestamp,
    pub finding_count: usize,
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Persistence for findings, partitioned by task.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Insert a new finding. Fails if the id already exists in the task.
    async fn insert(&self, finding: &Finding) -> ArbiterResult<()>;

    /// Insert several findings; all or nothing.
    async fn insert_batch(&self, findings: &[Finding]) -> ArbiterResult<()>;

    /// Insert freshly submitted findings, all or nothing, returning them as
    /// stored.
    ///
    /// The store sets `created_at` and `updated_at` from its own clock at
    /// the moment the findings become visible. A reader that does not see
    /// them therefore read strictly before their `created_at`.
    async fn insert_submission(&self, findings: Vec<Finding>) -> ArbiterResult<Vec<Finding>>;

    /// Apply a partial update and return the stored result.
    async fn update(
        &self,
        task_id: &TaskId,
        id: FindingId,
        update: FindingUpdate,
    ) -> ArbiterResult<Finding>;

    /// Get a finding by ID.
    async fn get(&self, task_id: &TaskId, id: FindingId) -> ArbiterResult<Option<Finding>>;

    /// List findings with the given status, in insertion order.
    async fn list_by_status(
        &self,
        task_id: &TaskId,
        status: FindingStatus,
    ) -> ArbiterResult<Vec<Finding>>;

    /// List every finding of a task, in insertion order.
    async fn list_all(&self, task_id: &TaskId) -> ArbiterResult<Vec<Finding>>;

    /// List an agent's findings created strictly after `since`, ordered by
    /// `created_at`. `None` returns all of them.
    async fn list_by_agent_since(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        since: Option<Timestamp>,
    ) -> ArbiterResult<Vec<Finding>>;
}

/// Persistence for per-task bookkeeping documents.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_watermark(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> ArbiterResult<Option<SyncWatermark>>;

    /// Store a watermark unless the stored one is already later. Returns the
    /// watermark in effect after the call.
    async fn set_watermark(&self, watermark: &SyncWatermark) -> ArbiterResult<SyncWatermark>;

    async fn get_processed_marker(&self, task_id: &TaskId)
        -> ArbiterResult<Option<ProcessedMarker>>;

    async fn set_processed_marker(&self, marker: &ProcessedMarker) -> ArbiterResult<()>;

    /// Draw the next submission batch id for (task, agent). Starts at 1.
    async fn next_submission_batch_id(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> ArbiterResult<u64>;
}
