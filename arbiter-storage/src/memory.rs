//! In-memory store used by tests and the offline runner.

use crate::{keys, FindingStore, FindingUpdate, MetadataStore, ProcessedMarker};
use arbiter_core::{
    AgentId, ArbiterError, ArbiterResult, Finding, FindingId, FindingStatus, StorageError,
    SyncWatermark, TaskId, Timestamp,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct TaskCollection {
    order: Vec<FindingId>,
    by_id: HashMap<FindingId, Finding>,
}

impl TaskCollection {
    fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// In-memory implementation of both store traits.
///
/// Cloning shares the underlying state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    findings: Arc<RwLock<HashMap<TaskId, TaskCollection>>>,
    metadata: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of findings stored for a task.
    pub async fn finding_count(&self, task_id: &TaskId) -> usize {
        self.findings
            .read()
            .await
            .get(task_id)
            .map(|c| c.order.len())
            .unwrap_or(0)
    }

    /// Remove every stored document.
    pub async fn clear(&self) {
        self.findings.write().await.clear();
        self.metadata.write().await.clear();
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> ArbiterResult<Option<T>> {
        let metadata = self.metadata.read().await;
        match metadata.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ArbiterError::Storage(StorageError::MetadataFailed {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize>(&self, key: String, value: &T) -> ArbiterResult<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            ArbiterError::Storage(StorageError::MetadataFailed {
                key: key.clone(),
                reason: e.to_string(),
            })
        })?;
        self.metadata.write().await.insert(key, value);
        Ok(())
    }
}

fn update_failed(id: FindingId, reason: impl Into<String>) -> ArbiterError {
    ArbiterError::Storage(StorageError::UpdateFailed {
        id,
        reason: reason.into(),
    })
}

/// Insert under an already-held write lock. Checks everything before
/// touching anything.
fn insert_all(
    tasks: &mut HashMap<TaskId, TaskCollection>,
    findings: &[Finding],
) -> ArbiterResult<()> {
    let mut seen = HashSet::new();
    for finding in findings {
        let exists = tasks
            .get(&finding.task_id)
            .map(|c| c.by_id.contains_key(&finding.id))
            .unwrap_or(false);
        if exists || !seen.insert((finding.task_id.clone(), finding.id)) {
            return Err(ArbiterError::Storage(StorageError::InsertFailed {
                task_id: finding.task_id.clone(),
                reason: format!("finding {} already exists", finding.id),
            }));
        }
    }

    for finding in findings {
        let collection = tasks.entry(finding.task_id.clone()).or_default();
        collection.order.push(finding.id);
        collection.by_id.insert(finding.id, finding.clone());
    }
    Ok(())
}

#[async_trait]
impl FindingStore for InMemoryStore {
    async fn insert(&self, finding: &Finding) -> ArbiterResult<()> {
        self.insert_batch(std::slice::from_ref(finding)).await
    }

    async fn insert_batch(&self, findings: &[Finding]) -> ArbiterResult<()> {
        let mut tasks = self.findings.write().await;
        insert_all(&mut tasks, findings)?;
        tracing::trace!(count = findings.len(), "Inserted findings");
        Ok(())
    }

    async fn insert_submission(&self, mut findings: Vec<Finding>) -> ArbiterResult<Vec<Finding>> {
        let mut tasks = self.findings.write().await;
        let now = Utc::now();
        for finding in &mut findings {
            finding.created_at = now;
            finding.updated_at = now;
        }
        insert_all(&mut tasks, &findings)?;
        tracing::trace!(count = findings.len(), created_at = %now, "Inserted submission");
        Ok(findings)
    }

    async fn update(
        &self,
        task_id: &TaskId,
        id: FindingId,
        update: FindingUpdate,
    ) -> ArbiterResult<Finding> {
        let mut tasks = self.findings.write().await;
        let collection = tasks.get_mut(task_id).ok_or_else(|| {
            ArbiterError::Storage(StorageError::NotFound {
                task_id: task_id.clone(),
                id,
            })
        })?;

        if let Some(Some(original)) = update.duplicate_of {
            if original == id {
                return Err(update_failed(id, "a finding cannot duplicate itself"));
            }
            if !collection.by_id.contains_key(&original) {
                return Err(update_failed(
                    id,
                    format!("duplicate_of references unknown finding {}", original),
                ));
            }
        }

        let finding = collection.by_id.get_mut(&id).ok_or_else(|| {
            ArbiterError::Storage(StorageError::NotFound {
                task_id: task_id.clone(),
                id,
            })
        })?;

        if let Some(status) = update.status {
            if !finding.status.can_transition_to(status) {
                return Err(update_failed(
                    id,
                    format!("illegal status transition {} -> {}", finding.status, status),
                ));
            }
            finding.status = status;
        }
        if let Some(severity) = update.evaluated_severity {
            finding.evaluated_severity = severity;
        }
        if let Some(comment) = update.evaluation_comment {
            finding.evaluation_comment = comment;
        }
        if let Some(comment) = update.deduplication_comment {
            finding.deduplication_comment = comment;
        }
        if let Some(original) = update.duplicate_of {
            finding.duplicate_of = original;
        }
        finding.updated_at = Utc::now().max(finding.updated_at);

        Ok(finding.clone())
    }

    async fn get(&self, task_id: &TaskId, id: FindingId) -> ArbiterResult<Option<Finding>> {
        let tasks = self.findings.read().await;
        Ok(tasks.get(task_id).and_then(|c| c.by_id.get(&id)).cloned())
    }

    async fn list_by_status(
        &self,
        task_id: &TaskId,
        status: FindingStatus,
    ) -> ArbiterResult<Vec<Finding>> {
        let tasks = self.findings.read().await;
        Ok(tasks
            .get(task_id)
            .map(|c| c.iter().filter(|f| f.status == status).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_all(&self, task_id: &TaskId) -> ArbiterResult<Vec<Finding>> {
        let tasks = self.findings.read().await;
        Ok(tasks
            .get(task_id)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_by_agent_since(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        since: Option<Timestamp>,
    ) -> ArbiterResult<Vec<Finding>> {
        let tasks = self.findings.read().await;
        let mut findings: Vec<Finding> = tasks
            .get(task_id)
            .map(|c| {
                c.iter()
                    .filter(|f| &f.agent_id == agent_id)
                    .filter(|f| since.map_or(true, |at| f.created_at > at))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        findings.sort_by_key(|f| f.created_at);
        Ok(findings)
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn get_watermark(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> ArbiterResult<Option<SyncWatermark>> {
        self.get_json(&keys::last_sync(task_id, agent_id)).await
    }

    async fn set_watermark(&self, watermark: &SyncWatermark) -> ArbiterResult<SyncWatermark> {
        let key = keys::last_sync(&watermark.task_id, &watermark.agent_id);
        let mut metadata = self.metadata.write().await;

        if let Some(existing) = metadata.get(&key) {
            if let Ok(existing) = serde_json::from_value::<SyncWatermark>(existing.clone()) {
                if existing.last_synced_at >= watermark.last_synced_at {
                    return Ok(existing);
                }
            }
        }

        let value = serde_json::to_value(watermark).map_err(|e| {
            ArbiterError::Storage(StorageError::MetadataFailed {
                key: key.clone(),
                reason: e.to_string(),
            })
        })?;
        metadata.insert(key, value);
        Ok(watermark.clone())
    }

    async fn get_processed_marker(
        &self,
        task_id: &TaskId,
    ) -> ArbiterResult<Option<ProcessedMarker>> {
        self.get_json(&keys::processed_marker(task_id)).await
    }

    async fn set_processed_marker(&self, marker: &ProcessedMarker) -> ArbiterResult<()> {
        self.put_json(keys::processed_marker(&marker.task_id), marker)
            .await
    }

    async fn next_submission_batch_id(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
    ) -> ArbiterResult<u64> {
        let key = keys::submission_counter(task_id, agent_id);
        let mut metadata = self.metadata.write().await;
        let next = metadata.get(&key).and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        metadata.insert(key, serde_json::Value::from(next));
        Ok(next)
    }
}
