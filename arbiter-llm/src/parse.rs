//! Parsing of judge answers.
//!
//! Models wrap JSON in prose or markdown fences often enough that the
//! payload is located first and decoded second. An id that is not a UUID
//! is replaced by a fresh one that matches no finding, so the entry still
//! reaches the engine and is dropped and counted there as unknown.

use crate::JudgeResult;
use arbiter_core::{DuplicateRelationship, FindingEvaluation, FindingId, JudgeError};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// Locate the JSON payload inside a model answer.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(captures) = fence_pattern().and_then(|re| re.captures(text)) {
        if let Some(body) = captures.get(1) {
            let body = body.as_str().trim();
            if !body.is_empty() {
                return Some(body);
            }
        }
    }

    let start = text.find(|c: char| c == '{' || c == '[')?;
    let end = text.rfind(|c: char| c == '}' || c == ']')?;
    (end >= start).then(|| text[start..=end].trim())
}

// ============================================================================
// WIRE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRelationship {
    #[serde(alias = "finding_id", alias = "findingID")]
    #[serde(rename = "findingId")]
    finding_id: String,
    #[serde(alias = "duplicate_of", alias = "duplicateOfId")]
    #[serde(rename = "duplicateOf")]
    duplicate_of: String,
    #[serde(default)]
    explanation: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelationshipEnvelope {
    Wrapped {
        #[serde(alias = "duplicate_relationships", alias = "results")]
        duplicates: Vec<RawRelationship>,
    },
    Bare(Vec<RawRelationship>),
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    #[serde(alias = "finding_id", alias = "id")]
    #[serde(rename = "findingId")]
    finding_id: String,
    #[serde(alias = "is_valid")]
    #[serde(rename = "isValid")]
    is_valid: bool,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EvaluationEnvelope {
    Wrapped {
        #[serde(alias = "evaluations")]
        results: Vec<RawEvaluation>,
    },
    Bare(Vec<RawEvaluation>),
}

fn malformed(provider: &str, reason: impl Into<String>) -> JudgeError {
    JudgeError::Malformed {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}

fn parse_id(provider: &str, raw: &str) -> FindingId {
    raw.parse::<FindingId>().unwrap_or_else(|_| {
        tracing::warn!(provider, id = raw, "Judge returned a non-UUID finding id");
        FindingId::now_v7()
    })
}

/// Decode a deduplication answer.
pub fn parse_relationships(provider: &str, text: &str) -> JudgeResult<Vec<DuplicateRelationship>> {
    let payload = extract_json(text).ok_or_else(|| malformed(provider, "no JSON in answer"))?;
    let envelope: RelationshipEnvelope =
        serde_json::from_str(payload).map_err(|e| malformed(provider, e.to_string()))?;
    let raw = match envelope {
        RelationshipEnvelope::Wrapped { duplicates } => duplicates,
        RelationshipEnvelope::Bare(list) => list,
    };

    Ok(raw
        .into_iter()
        .map(|r| DuplicateRelationship {
            finding_id: parse_id(provider, &r.finding_id),
            duplicate_of: parse_id(provider, &r.duplicate_of),
            explanation: r.explanation,
        })
        .collect())
}

/// Decode an evaluation answer.
pub fn parse_evaluations(provider: &str, text: &str) -> JudgeResult<Vec<FindingEvaluation>> {
    let payload = extract_json(text).ok_or_else(|| malformed(provider, "no JSON in answer"))?;
    let envelope: EvaluationEnvelope =
        serde_json::from_str(payload).map_err(|e| malformed(provider, e.to_string()))?;
    let raw = match envelope {
        EvaluationEnvelope::Wrapped { results } => results,
        EvaluationEnvelope::Bare(list) => list,
    };

    Ok(raw
        .into_iter()
        .map(|r| FindingEvaluation {
            finding_id: parse_id(provider, &r.finding_id),
            is_valid: r.is_valid,
            severity: r.severity,
            comment: r.comment,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fence() {
        let text = "Here you go:\n```json\n{\"duplicates\": []}\n```\nDone.";
        assert_eq!(extract_json(text), Some("{\"duplicates\": []}"));
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Result: [1, 2] as requested";
        assert_eq!(extract_json(text), Some("[1, 2]"));
        assert_eq!(extract_json("no payload here"), None);
    }

    #[test]
    fn test_parse_relationships_wrapped_and_bare() {
        let a = FindingId::now_v7();
        let b = FindingId::now_v7();
        let wrapped = format!(
            r#"{{"duplicates": [{{"findingId": "{b}", "duplicateOf": "{a}", "explanation": "same bug"}}]}}"#
        );
        let bare = format!(r#"[{{"finding_id": "{b}", "duplicate_of": "{a}"}}]"#);

        let parsed = parse_relationships("test", &wrapped).unwrap();
        assert_eq!(
            parsed,
            vec![DuplicateRelationship {
                finding_id: b,
                duplicate_of: a,
                explanation: "same bug".to_string(),
            }]
        );

        let parsed = parse_relationships("test", &bare).unwrap();
        assert_eq!(parsed[0].finding_id, b);
        assert_eq!(parsed[0].explanation, "");
    }

    #[test]
    fn test_parse_relationships_keeps_non_uuid_ids_as_unknown() {
        let a = FindingId::now_v7();
        let text = format!(
            r#"{{"duplicates": [{{"findingId": "finding-7", "duplicateOf": "{a}", "explanation": "x"}},
                               {{"findingId": "finding-8", "duplicateOf": "finding-9"}}]}}"#
        );
        let parsed = parse_relationships("test", &text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].duplicate_of, a);
        assert_ne!(parsed[0].finding_id, a);
        assert_ne!(parsed[1].finding_id, parsed[1].duplicate_of);
    }

    #[test]
    fn test_parse_relationships_malformed() {
        let err = parse_relationships("gemini", "I could not decide.").unwrap_err();
        assert!(err.is_malformed());
        let err = parse_relationships("gemini", "{\"duplicates\": 7}").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_parse_evaluations() {
        let a = FindingId::now_v7();
        let text = format!(
            "```\n{{\"results\": [{{\"findingId\": \"{a}\", \"isValid\": false, \"severity\": \"Critical\", \"comment\": \"not reachable\"}}]}}\n```"
        );
        let parsed = parse_evaluations("anthropic", &text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].finding_id, a);
        assert!(!parsed[0].is_valid);
        assert_eq!(parsed[0].severity, "Critical");
    }

    #[test]
    fn test_parse_evaluations_missing_validity_is_malformed() {
        let a = FindingId::now_v7();
        let text = format!(r#"{{"results": [{{"findingId": "{a}", "severity": "low"}}]}}"#);
        assert!(parse_evaluations("anthropic", &text).unwrap_err().is_malformed());
    }
}
