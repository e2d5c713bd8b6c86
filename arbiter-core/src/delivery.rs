//! Outbound delivery collaborator

use crate::{AgentId, ArbiterResult, Finding, TaskId};
use async_trait::async_trait;

/// Posts an agent's evaluated findings to the backend.
///
/// `Ok(true)` means the backend confirmed receipt. `Ok(false)` is a
/// definite rejection. `Err` is a transport failure worth retrying.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn post(
        &self,
        task_id: &TaskId,
        agent_id: &AgentId,
        findings: &[Finding],
    ) -> ArbiterResult<bool>;
}
