//! Prompt text shared by every provider adapter.
//!
//! Findings are embedded as a JSON array so the judge can echo ids back
//! verbatim.

use arbiter_core::FindingContent;
use serde::Serialize;

pub const DEDUPLICATION_SYSTEM: &str = "You are a security expert with deep expertise in \
smart contract and application vulnerabilities. You identify duplicate reports among \
security findings submitted by independent reviewers. You answer with JSON only.";

pub const EVALUATION_SYSTEM: &str = "You are a senior security auditor. You judge whether \
reported security findings are valid and assign each a severity. You answer with JSON only.";

#[derive(Serialize)]
struct PromptFinding<'a> {
    id: String,
    title: &'a str,
    description: &'a str,
    severity: &'static str,
    file_paths: &'a [String],
}

fn findings_json(findings: &[FindingContent]) -> String {
    let rendered: Vec<PromptFinding<'_>> = findings
        .iter()
        .map(|f| PromptFinding {
            id: f.id.to_string(),
            title: &f.title,
            description: &f.description,
            severity: f.reported_severity.as_db_str(),
            file_paths: &f.file_references,
        })
        .collect();
    serde_json::to_string_pretty(&rendered).unwrap_or_else(|_| "[]".to_string())
}

/// User prompt asking for every duplicate relationship in one answer.
pub fn deduplication_prompt(findings: &[FindingContent]) -> String {
    format!(
        r#"Identify findings below that describe the same underlying vulnerability.

Duplicates: same vulnerability type in the same function or contract, the same root cause
described differently, or the same code issue seen from different angles.
Not duplicates: similar vulnerability types in different locations, different root causes
with similar wording, or the same pattern affecting different contracts or functions.

For each group of duplicates pick the highest quality report as the original (most
accurate, complete, clear, best evidence and remediation advice). List only the
duplicates, never the originals. Be conservative: when in doubt, keep findings separate.

Answer with exactly this JSON shape and nothing else:
{{"duplicates": [{{"findingId": "<id of the duplicate>", "duplicateOf": "<id of the original>", "explanation": "<2-3 sentences>"}}]}}
Use the exact ids given below. Answer {{"duplicates": []}} when there are none.

FINDINGS:
{}"#,
        findings_json(findings)
    )
}

/// User prompt asking for one validity verdict per finding.
pub fn evaluation_prompt(findings: &[FindingContent]) -> String {
    format!(
        r#"Evaluate each security finding below. Findings in this batch may describe the same
vulnerability; judge them consistently.

For every finding decide whether it is a real, exploitable issue (isValid) and assign a
severity of "low", "medium" or "high". Explain your verdict in one or two sentences.

Answer with exactly this JSON shape and nothing else, one entry per finding:
{{"results": [{{"findingId": "<id>", "isValid": true, "severity": "medium", "comment": "<reasoning>"}}]}}
Use the exact ids given below.

FINDINGS:
{}"#,
        findings_json(findings)
    )
}
