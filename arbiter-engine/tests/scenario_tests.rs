//! End-to-end lifecycle scenarios
//!
//! Each test drives a full processing cycle through `CycleRunner` against
//! the in-memory store and a scripted judge, then checks what was persisted.

use arbiter_core::{
    EvaluatedSeverity, Finding, FindingId, FindingStatus, JudgeError, RetryConfig, TaskId,
};
use arbiter_engine::{
    CycleOutcome, CycleReport, CycleRunner, DeadlineScheduler, ResolveErrorKind, SubmissionGate,
    SyncTracker,
};
use arbiter_llm::JudgeRegistry;
use arbiter_storage::{FindingStore, InMemoryStore, MetadataStore};
use arbiter_test_utils::{assertions, fixtures, FlakyStore, RecordingDelivery, ScriptedJudge};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// HELPERS
// ============================================================================

fn runner(store: &InMemoryStore, judge: ScriptedJudge) -> CycleRunner {
    CycleRunner::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        JudgeRegistry::single(Arc::new(judge)),
        fixtures::test_config(),
    )
}

async fn seed(store: &InMemoryStore, agents: &[&str]) -> Vec<Finding> {
    let findings = fixtures::pending_findings("t1", agents);
    store.insert_batch(&findings).await.unwrap();
    findings
}

async fn run_to_report(runner: &CycleRunner) -> CycleReport {
    match runner.run(&fixtures::task_id("t1")).await.unwrap() {
        CycleOutcome::Completed(report) => report,
        other => panic!("Expected a completed cycle, got {:?}", other),
    }
}

async fn stored(store: &InMemoryStore, id: FindingId) -> Finding {
    store
        .get(&fixtures::task_id("t1"), id)
        .await
        .unwrap()
        .unwrap()
}

// ============================================================================
// DEDUPLICATION SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_cross_agent_duplicate_is_similar_valid() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2"]).await;
    let (a, b) = (findings[0].id, findings[1].id);
    let judge = ScriptedJudge::new().with_relationships(vec![fixtures::relationship(b, a)]);

    let report = run_to_report(&runner(&store, judge)).await;
    assert!(report.is_clean());

    let stored_a = stored(&store, a).await;
    let stored_b = stored(&store, b).await;
    assertions::assert_status(&stored_a, FindingStatus::BestValid);
    assertions::assert_status(&stored_b, FindingStatus::SimilarValid);
    assert_eq!(stored_b.duplicate_of, Some(a));
    assert!(stored_a.duplicate_of.is_none());
    assert!(stored_b
        .deduplication_comment
        .as_deref()
        .unwrap()
        .contains("Same root cause"));
}

#[tokio::test]
async fn scenario_first_same_agent_duplicate_is_similar_valid() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent1"]).await;
    let (a, c) = (findings[0].id, findings[1].id);
    let judge = ScriptedJudge::new().with_relationships(vec![fixtures::relationship(c, a)]);

    run_to_report(&runner(&store, judge)).await;

    assertions::assert_status(&stored(&store, a).await, FindingStatus::BestValid);
    assertions::assert_status(&stored(&store, c).await, FindingStatus::SimilarValid);
}

#[tokio::test]
async fn scenario_repeat_same_agent_duplicate_is_already_reported() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent1", "agent1", "agent2"]).await;
    let (a, c, d, e) = (findings[0].id, findings[1].id, findings[2].id, findings[3].id);
    let judge = ScriptedJudge::new().with_relationships(vec![
        fixtures::relationship(c, a),
        fixtures::relationship(d, a),
        fixtures::relationship(e, a),
    ]);

    let report = run_to_report(&runner(&store, judge)).await;
    assert_eq!(report.batches, 1);

    assertions::assert_status(&stored(&store, a).await, FindingStatus::BestValid);
    assertions::assert_status(&stored(&store, c).await, FindingStatus::SimilarValid);
    let repeat = stored(&store, d).await;
    assertions::assert_status(&repeat, FindingStatus::AlreadyReported);
    assert_eq!(repeat.duplicate_of, Some(a));
    assertions::assert_status(&stored(&store, e).await, FindingStatus::SimilarValid);
}

#[tokio::test]
async fn scenario_invalid_group_is_disputed_together() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2", "agent3"]).await;
    let (a, b, c) = (findings[0].id, findings[1].id, findings[2].id);
    let judge = ScriptedJudge::new()
        .with_relationships(vec![fixtures::relationship(b, a), fixtures::relationship(c, a)])
        .with_verdict(a, false, "High");

    let report = run_to_report(&runner(&store, judge)).await;
    assert_eq!(report.verdicts.disputed_count, 3);

    for id in [a, b, c] {
        let finding = stored(&store, id).await;
        assertions::assert_status(&finding, FindingStatus::Disputed);
        assert!(finding.evaluated_severity.is_none());
        assert!(finding.evaluation_comment.is_some());
    }
}

#[tokio::test]
async fn scenario_unknown_id_relationship_is_dropped() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2"]).await;
    let (a, b) = (findings[0].id, findings[1].id);
    let judge = ScriptedJudge::new()
        .with_relationships(vec![fixtures::relationship(b, FindingId::now_v7())]);

    let report = run_to_report(&runner(&store, judge)).await;
    assert_eq!(report.relationships, 0);
    assert_eq!(report.relationships_dropped, 1);

    for id in [a, b] {
        let finding = stored(&store, id).await;
        assertions::assert_status(&finding, FindingStatus::UniqueValid);
        assert!(finding.duplicate_of.is_none());
    }
}

#[tokio::test]
async fn scenario_severity_text_is_normalized() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2"]).await;
    let (a, b) = (findings[0].id, findings[1].id);
    let judge = ScriptedJudge::new()
        .with_verdict(a, true, "Critical")
        .with_verdict(b, true, "n/a");

    run_to_report(&runner(&store, judge)).await;

    assert_eq!(
        stored(&store, a).await.evaluated_severity,
        Some(EvaluatedSeverity::High)
    );
    assert_eq!(
        stored(&store, b).await.evaluated_severity,
        Some(EvaluatedSeverity::Medium)
    );
}

#[tokio::test]
async fn scenario_pending_for_delivery_is_stable_without_commit() {
    let store = InMemoryStore::new();
    seed(&store, &["agent1", "agent2", "agent1"]).await;
    let sync = SyncTracker::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        RetryConfig::none(),
    );
    let (task, agent) = (fixtures::task_id("t1"), fixtures::agent_id("agent1"));

    let first = sync.pending_for_delivery(&task, &agent).await.unwrap();
    let second = sync.pending_for_delivery(&task, &agent).await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

// ============================================================================
// DEGRADATION AND RETRY
// ============================================================================

#[tokio::test]
async fn scenario_judge_outage_degrades_to_unique() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2"]).await;
    let judge = ScriptedJudge::new().fail_compare(JudgeError::RequestFailed {
        provider: "scripted".to_string(),
        status: 503,
        message: "overloaded".to_string(),
    });

    let report = run_to_report(&runner(&store, judge)).await;
    assert_eq!(report.judge_error, Some(ResolveErrorKind::JudgeUnavailable));

    for finding in &findings {
        assertions::assert_status(&stored(&store, finding.id).await, FindingStatus::UniqueValid);
    }
}

#[tokio::test]
async fn scenario_aborted_cycle_leaves_no_marker_and_reruns() {
    let store = InMemoryStore::new();
    seed(&store, &["agent1"]).await;
    let task = fixtures::task_id("t1");

    let broken = CycleRunner::new(
        Arc::new(FlakyStore::new(store.clone()).fail_reads()),
        Arc::new(store.clone()),
        JudgeRegistry::single(Arc::new(ScriptedJudge::new())),
        fixtures::test_config(),
    );
    assert!(broken.run(&task).await.is_err());
    assert!(store.get_processed_marker(&task).await.unwrap().is_none());
    assert_eq!(broken.metrics().snapshot().cycles_failed, 1);

    let report = run_to_report(&runner(&store, ScriptedJudge::new())).await;
    assert_eq!(report.pending_found, 1);
    assertions::assert_none_pending(&store.list_all(&task).await.unwrap());
}

#[tokio::test]
async fn scenario_partial_write_failure_is_finished_by_rerun() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2", "agent3"]).await;
    let task = fixtures::task_id("t1");
    let flaky = FlakyStore::new(store.clone()).fail_updates_for([findings[1].id]);
    let judge = ScriptedJudge::new();
    let delivery = Arc::new(RecordingDelivery::new());
    let broken = CycleRunner::new(
        Arc::new(flaky),
        Arc::new(store.clone()),
        JudgeRegistry::single(Arc::new(judge.clone())),
        fixtures::test_config(),
    )
    .with_delivery(delivery.clone());

    let report = run_to_report(&broken).await;
    assert_eq!(report.status_write_failures, 1);
    assert_eq!(report.statuses_assigned, 2);
    assert_eq!(report.deliveries_deferred, 1);
    assert!(!report.marked_processed);
    assert!(!report.is_clean());
    assert!(store.get_processed_marker(&task).await.unwrap().is_none());

    assertions::assert_status(&stored(&store, findings[0].id).await, FindingStatus::UniqueValid);
    assertions::assert_status(&stored(&store, findings[1].id).await, FindingStatus::Pending);
    assertions::assert_status(&stored(&store, findings[2].id).await, FindingStatus::UniqueValid);

    // The finding without a status was neither judged nor posted.
    assert!(judge
        .evaluated_batches()
        .iter()
        .all(|batch| !batch.contains(&findings[1].id)));
    assert_eq!(delivery.post_count(), 2);
    assert!(delivery
        .posts()
        .iter()
        .all(|post| !post.finding_ids.contains(&findings[1].id)));

    let healthy = runner(&store, ScriptedJudge::new()).with_delivery(delivery.clone());
    let rerun = run_to_report(&healthy).await;
    assert_eq!(rerun.pending_found, 1);
    assert!(rerun.marked_processed);
    assert!(rerun.is_clean());

    let finished = stored(&store, findings[1].id).await;
    assertions::assert_status(&finished, FindingStatus::UniqueValid);
    assert!(finished.evaluated_severity.is_some());
    assertions::assert_none_pending(&store.list_all(&task).await.unwrap());
    assert!(delivery
        .posts()
        .iter()
        .any(|post| post.finding_ids.contains(&findings[1].id)));
    assert!(healthy.run(&task).await.unwrap().is_skipped());
}

#[tokio::test]
async fn scenario_short_evaluation_answer_leaves_finding_unevaluated() {
    let store = InMemoryStore::new();
    let findings = seed(&store, &["agent1", "agent2"]).await;
    let judge = ScriptedJudge::new().omit(findings[1].id);

    let report = run_to_report(&runner(&store, judge)).await;
    assert_eq!(report.unevaluated, 1);
    assert_eq!(report.verdicts.valid_count, 1);

    let skipped = stored(&store, findings[1].id).await;
    assertions::assert_status(&skipped, FindingStatus::UniqueValid);
    assert!(skipped.evaluated_severity.is_none());
}

// ============================================================================
// INTAKE, DELIVERY AND SCHEDULING
// ============================================================================

#[tokio::test]
async fn scenario_submission_to_delivery() {
    let store = InMemoryStore::new();
    let task = fixtures::task_id("t1");
    let gate = SubmissionGate::new(Arc::new(store.clone()), Arc::new(store.clone()), 20);

    let first = gate
        .submit(
            &task,
            &fixtures::agent_id("agent1"),
            vec![fixtures::new_finding("Reentrancy in withdraw")],
        )
        .await
        .unwrap();
    let second = gate
        .submit(
            &task,
            &fixtures::agent_id("agent2"),
            vec![fixtures::new_finding("Withdraw can be re-entered")],
        )
        .await
        .unwrap();
    let (a, b) = (first.finding_ids[0], second.finding_ids[0]);

    let judge = ScriptedJudge::new()
        .with_relationships(vec![fixtures::relationship(b, a)])
        .with_verdict(a, true, "high");
    let delivery = Arc::new(RecordingDelivery::new());
    let runner = runner(&store, judge).with_delivery(delivery.clone());

    let report = run_to_report(&runner).await;
    assert_eq!(report.agents_delivered, 2);
    assert_eq!(delivery.accepted_posts().len(), 2);
    for agent in ["agent1", "agent2"] {
        assert!(store
            .get_watermark(&task, &fixtures::agent_id(agent))
            .await
            .unwrap()
            .is_some());
    }

    let summary = runner.summarize_task(&task).await.unwrap();
    assert_eq!(summary.total_findings, 2);
    assert_eq!(summary.credited_findings, 2);
    assert_eq!(summary.severity_distribution["High"], 2);
    assert_eq!(summary.duplicate_groups.len(), 1);
    assert_eq!(summary.duplicate_groups[0].original, a);
}

#[tokio::test(start_paused = true)]
async fn scenario_scheduled_and_manual_trigger_process_once() {
    let store = InMemoryStore::new();
    seed(&store, &["agent1", "agent2"]).await;
    let judge = ScriptedJudge::new();
    let runner = runner(&store, judge.clone());
    let scheduler = DeadlineScheduler::new(runner.clone());
    let task = TaskId::from("t1");

    assert!(
        scheduler
            .schedule(&fixtures::open_schedule("t1", chrono::Duration::seconds(-1)))
            .await
    );
    runner.run(&task).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.shutdown().await;

    let snapshot = runner.metrics().snapshot();
    assert_eq!(snapshot.cycles_completed, 1);
    assert_eq!(snapshot.cycles_skipped, 1);
    assert_eq!(judge.compare_calls(), 1);
}
