//! ARBITER Engine - Finding Lifecycle Orchestration
//!
//! Takes the pending findings of a task through one processing cycle:
//! duplicate resolution by the judge, deterministic status assignment,
//! batched validity evaluation, verdict application and per-agent
//! delivery. Around the cycle sit the submission gate, the task schedule
//! cache and the deadline scheduler that triggers cycles.
//!
//! Storage and judges are injected as trait objects from `arbiter-storage`
//! and `arbiter-llm`; nothing here knows about a concrete backend.

pub mod batcher;
pub mod cycle;
pub mod delivery;
pub mod graph;
pub mod intake;
pub mod metrics;
pub mod report;
pub mod resolver;
pub mod schedule;
pub mod scheduler;
pub mod status;
pub mod sync;
pub mod telemetry;
pub mod verdict;

// Re-export commonly used types
pub use batcher::{group_for_evaluation, BatchVerdict, EvaluationBatch};
pub use cycle::{CycleOutcome, CycleRunner, SkipReason};
pub use delivery::HttpDelivery;
pub use graph::DuplicateGraph;
pub use intake::{SubmissionGate, SubmissionReceipt};
pub use metrics::{CycleMetrics, CycleMetricsSnapshot};
pub use report::{summarize, CycleReport, DuplicateGroupSummary, TaskSummary};
pub use resolver::{DropReason, DuplicateResolver, ResolveErrorKind, ResolveOutcome};
pub use schedule::{
    schedule_refresh_task, StaticTaskDirectory, TaskDirectory, TaskScheduleCache,
};
pub use scheduler::DeadlineScheduler;
pub use status::{assign_statuses, next_status, StatusDecision};
pub use sync::{DeliveryOutcome, SyncTracker};
pub use telemetry::{init_tracing, LogFormat};
pub use verdict::{ApplyOutcome, VerdictApplier};
