//! Composite metadata keys.
//!
//! The metadata collection is a flat key/value space shared by every task,
//! so keys carry their own namespace prefix.

use arbiter_core::{AgentId, TaskId};

/// Marker written once a task's processing cycle has completed.
pub fn processed_marker(task_id: &TaskId) -> String {
    format!("task:{}", task_id)
}

/// Last successful delivery time for one agent in one task.
pub fn last_sync(task_id: &TaskId, agent_id: &AgentId) -> String {
    format!("last_sync:{}:{}", task_id, agent_id)
}

/// Per (task, agent) submission counter.
pub fn submission_counter(task_id: &TaskId, agent_id: &AgentId) -> String {
    format!("submission:{}:{}", task_id, agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        let task = TaskId::from("t-9");
        let agent = AgentId::from("scanner");
        assert_eq!(processed_marker(&task), "task:t-9");
        assert_eq!(last_sync(&task, &agent), "last_sync:t-9:scanner");
        assert_eq!(submission_counter(&task, &agent), "submission:t-9:scanner");
    }

    #[test]
    fn test_keys_do_not_collide_across_namespaces() {
        let task = TaskId::from("x");
        let agent = AgentId::from("y");
        assert_ne!(last_sync(&task, &agent), submission_counter(&task, &agent));
    }
}
