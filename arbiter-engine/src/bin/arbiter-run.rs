//! Offline cycle runner
//!
//! Loads a JSON file of agent submissions into an in-memory store, runs one
//! processing cycle against the judges configured in the environment and
//! prints the task summary as JSON to stdout.
//!
//! Usage:
//!   arbiter-run submissions.json
//!
//! Input format:
//!   {"task_id": "t1", "submissions": [{"agent_id": "a1", "findings": [...]}]}

use arbiter_core::{AgentId, ArbiterConfig, ArbiterError, ArbiterResult, ConfigError, NewFinding, TaskId};
use arbiter_engine::{
    init_tracing, CycleOutcome, CycleRunner, HttpDelivery, LogFormat, SubmissionGate, TaskSummary,
};
use arbiter_storage::InMemoryStore;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SubmissionFile {
    task_id: TaskId,
    submissions: Vec<AgentSubmission>,
}

#[derive(Debug, Deserialize)]
struct AgentSubmission {
    agent_id: AgentId,
    findings: Vec<NewFinding>,
}

fn input_error(path: &str, reason: String) -> ArbiterError {
    ArbiterError::Config(ConfigError::InvalidValue {
        field: "submissions_file".to_string(),
        value: path.to_string(),
        reason,
    })
}

async fn load(path: &str) -> ArbiterResult<SubmissionFile> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| input_error(path, format!("Failed to read: {}", e)))?;
    serde_json::from_str(&raw).map_err(|e| input_error(path, format!("Failed to parse: {}", e)))
}

async fn run(path: &str) -> ArbiterResult<TaskSummary> {
    let config = ArbiterConfig::from_env()?;
    config.validate()?;

    let input = load(path).await?;
    let store = InMemoryStore::new();

    let gate = SubmissionGate::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config.max_findings_per_submission,
    );
    for submission in input.submissions {
        gate.submit(&input.task_id, &submission.agent_id, submission.findings)
            .await?;
    }

    let judges = arbiter_llm::build_registry(&config)?;
    let mut runner = CycleRunner::new(
        Arc::new(store.clone()),
        Arc::new(store),
        judges,
        config.clone(),
    );
    if let Some(delivery) = HttpDelivery::from_config(&config)? {
        tracing::info!(endpoint = delivery.endpoint(), "Delivery enabled");
        runner = runner.with_delivery(Arc::new(delivery));
    }

    match runner.run(&input.task_id).await? {
        CycleOutcome::Completed(report) => tracing::info!(
            task_id = %report.task_id,
            pending = report.pending_found,
            relationships = report.relationships,
            disputed = report.verdicts.disputed_count,
            clean = report.is_clean(),
            "Cycle completed"
        ),
        CycleOutcome::Skipped { task_id, reason } => {
            tracing::warn!(task_id = %task_id, reason = ?reason, "Cycle skipped")
        }
    }

    runner.summarize_task(&input.task_id).await
}

#[tokio::main]
async fn main() {
    if let Err(e) = init_tracing(LogFormat::from_env()) {
        eprintln!("{}", e);
    }

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: arbiter-run <submissions.json>");
        std::process::exit(2);
    };

    let summary = match run(&path).await {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("arbiter-run failed: {}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize summary: {}", e);
            std::process::exit(1);
        }
    }
}
