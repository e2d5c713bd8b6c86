//! Duplicate Resolver
//!
//! Sends every pending finding of a task to the judge in one call and keeps
//! only the relationships that form a clean original/duplicate partition.
//! A judge that is unavailable, slow or incoherent degrades the cycle to
//! "no duplicates" instead of failing it.

use crate::graph::DuplicateGraph;
use arbiter_core::{DuplicateRelationship, Finding, FindingId, JudgeError};
use arbiter_llm::Judge;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Why the judge's answer was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveErrorKind {
    /// Not configured, transport failure, rate limit or timeout.
    JudgeUnavailable,
    /// The judge answered but the answer could not be decoded.
    JudgeMalformed,
}

impl ResolveErrorKind {
    pub fn from_judge_error(error: &JudgeError) -> Self {
        if error.is_malformed() {
            Self::JudgeMalformed
        } else {
            Self::JudgeUnavailable
        }
    }
}

/// Why a relationship was dropped during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    SelfReference,
    UnknownFinding,
    /// Same pair already accepted.
    Repeated,
    /// Duplicate already claimed by another original.
    ConflictingOriginal,
    /// Would make an id both an original and a duplicate.
    Chained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRelationship {
    pub relationship: DuplicateRelationship,
    pub reason: DropReason,
}

/// Result of one resolution pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveOutcome {
    pub relationships: Vec<DuplicateRelationship>,
    pub dropped: Vec<DroppedRelationship>,
    pub error: Option<ResolveErrorKind>,
}

impl ResolveOutcome {
    fn degraded(kind: ResolveErrorKind) -> Self {
        Self {
            error: Some(kind),
            ..Self::default()
        }
    }

    pub fn graph(&self) -> DuplicateGraph {
        DuplicateGraph::from_relationships(&self.relationships)
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    /// Ids on the original side of accepted relationships.
    pub fn original_ids(&self) -> HashSet<FindingId> {
        self.relationships.iter().map(|r| r.duplicate_of).collect()
    }

    /// Ids on the duplicate side of accepted relationships.
    pub fn duplicate_ids(&self) -> HashSet<FindingId> {
        self.relationships.iter().map(|r| r.finding_id).collect()
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Keep the relationships that form a depth-one partition over `findings`.
///
/// Relationships are considered in judge order; the first accepted claim
/// wins. Pure function of its inputs.
pub fn validate_relationships(
    findings: &[Finding],
    candidates: Vec<DuplicateRelationship>,
) -> (Vec<DuplicateRelationship>, Vec<DroppedRelationship>) {
    let known: HashSet<FindingId> = findings.iter().map(|f| f.id).collect();
    let mut claimed: HashMap<FindingId, FindingId> = HashMap::new();
    let mut originals: HashSet<FindingId> = HashSet::new();

    let mut accepted = Vec::new();
    let mut dropped = Vec::new();

    for rel in candidates {
        let reason = if rel.finding_id == rel.duplicate_of {
            Some(DropReason::SelfReference)
        } else if !known.contains(&rel.finding_id) || !known.contains(&rel.duplicate_of) {
            Some(DropReason::UnknownFinding)
        } else if let Some(existing) = claimed.get(&rel.finding_id) {
            if *existing == rel.duplicate_of {
                Some(DropReason::Repeated)
            } else {
                Some(DropReason::ConflictingOriginal)
            }
        } else if originals.contains(&rel.finding_id) || claimed.contains_key(&rel.duplicate_of) {
            Some(DropReason::Chained)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::warn!(
                    finding_id = %rel.finding_id,
                    duplicate_of = %rel.duplicate_of,
                    reason = ?reason,
                    "Dropping duplicate relationship"
                );
                dropped.push(DroppedRelationship {
                    relationship: rel,
                    reason,
                });
            }
            None => {
                claimed.insert(rel.finding_id, rel.duplicate_of);
                originals.insert(rel.duplicate_of);
                accepted.push(rel);
            }
        }
    }

    (accepted, dropped)
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Runs the deduplication judge over a task's pending findings.
#[derive(Clone)]
pub struct DuplicateResolver {
    judge: Arc<dyn Judge>,
    timeout: Duration,
}

impl DuplicateResolver {
    pub fn new(judge: Arc<dyn Judge>, timeout: Duration) -> Self {
        Self { judge, timeout }
    }

    /// Resolve duplicate relationships among `findings`.
    ///
    /// No judge call is made for an empty set. Judge failures never
    /// propagate: they come back as an empty outcome with `error` set.
    pub async fn resolve(&self, findings: &[Finding]) -> ResolveOutcome {
        if findings.is_empty() {
            return ResolveOutcome::default();
        }

        let contents: Vec<_> = findings.iter().map(Finding::content).collect();
        let answer = tokio::time::timeout(self.timeout, self.judge.compare_all(&contents)).await;

        let candidates = match answer {
            Ok(Ok(candidates)) => candidates,
            Ok(Err(e)) => {
                let kind = ResolveErrorKind::from_judge_error(&e);
                tracing::warn!(
                    error = %e,
                    kind = ?kind,
                    findings = findings.len(),
                    "Deduplication judge failed; treating all findings as unique"
                );
                return ResolveOutcome::degraded(kind);
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    findings = findings.len(),
                    "Deduplication judge timed out; treating all findings as unique"
                );
                return ResolveOutcome::degraded(ResolveErrorKind::JudgeUnavailable);
            }
        };

        let (relationships, dropped) = validate_relationships(findings, candidates);
        tracing::info!(
            findings = findings.len(),
            relationships = relationships.len(),
            dropped = dropped.len(),
            "Duplicate resolution completed"
        );

        ResolveOutcome {
            relationships,
            dropped,
            error: None,
        }
    }
}

impl std::fmt::Debug for DuplicateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateResolver")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_test_utils::{fixtures, ScriptedJudge};

    fn rel(finding_id: FindingId, duplicate_of: FindingId) -> DuplicateRelationship {
        DuplicateRelationship {
            finding_id,
            duplicate_of,
            explanation: "same bug".to_string(),
        }
    }

    #[test]
    fn test_validate_drops_self_and_unknown() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let (a, b) = (findings[0].id, findings[1].id);
        let stranger = FindingId::now_v7();

        let (kept, dropped) = validate_relationships(
            &findings,
            vec![rel(a, a), rel(b, stranger), rel(b, a)],
        );

        assert_eq!(kept, vec![rel(b, a)]);
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].reason, DropReason::SelfReference);
        assert_eq!(dropped[1].reason, DropReason::UnknownFinding);
    }

    #[test]
    fn test_validate_keeps_first_original() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2", "a3"]);
        let (a, b, c) = (findings[0].id, findings[1].id, findings[2].id);

        let (kept, dropped) =
            validate_relationships(&findings, vec![rel(c, a), rel(c, b), rel(c, a)]);

        assert_eq!(kept, vec![rel(c, a)]);
        assert_eq!(dropped[0].reason, DropReason::ConflictingOriginal);
        assert_eq!(dropped[1].reason, DropReason::Repeated);
    }

    #[test]
    fn test_validate_rejects_chains() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2", "a3"]);
        let (a, b, c) = (findings[0].id, findings[1].id, findings[2].id);

        // b -> a accepted; a -> c would make a a duplicate; c -> b would
        // make b an original.
        let (kept, dropped) =
            validate_relationships(&findings, vec![rel(b, a), rel(a, c), rel(c, b)]);

        assert_eq!(kept, vec![rel(b, a)]);
        assert!(dropped.iter().all(|d| d.reason == DropReason::Chained));
    }

    #[tokio::test]
    async fn test_resolve_empty_makes_no_call() {
        let judge = Arc::new(ScriptedJudge::new());
        let resolver = DuplicateResolver::new(judge.clone(), Duration::from_secs(1));

        let outcome = resolver.resolve(&[]).await;
        assert_eq!(outcome, ResolveOutcome::default());
        assert_eq!(judge.compare_calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_degrades_on_malformed_answer() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let judge = Arc::new(ScriptedJudge::new().fail_compare(JudgeError::Malformed {
            provider: "scripted".to_string(),
            reason: "not json".to_string(),
        }));
        let resolver = DuplicateResolver::new(judge, Duration::from_secs(1));

        let outcome = resolver.resolve(&findings).await;
        assert!(outcome.relationships.is_empty());
        assert_eq!(outcome.error, Some(ResolveErrorKind::JudgeMalformed));
    }

    #[tokio::test]
    async fn test_resolve_degrades_on_unavailable_judge() {
        let findings = fixtures::pending_findings("t1", &["a1"]);
        let judge = Arc::new(ScriptedJudge::new().fail_compare(JudgeError::ProviderNotConfigured));
        let resolver = DuplicateResolver::new(judge, Duration::from_secs(1));

        let outcome = resolver.resolve(&findings).await;
        assert_eq!(outcome.error, Some(ResolveErrorKind::JudgeUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_times_out() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let judge = Arc::new(ScriptedJudge::new().with_delay(Duration::from_secs(30)));
        let resolver = DuplicateResolver::new(judge, Duration::from_secs(5));

        let outcome = resolver.resolve(&findings).await;
        assert_eq!(outcome.error, Some(ResolveErrorKind::JudgeUnavailable));
        assert!(outcome.relationships.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_validates_judge_answer() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let (a, b) = (findings[0].id, findings[1].id);
        let judge = Arc::new(
            ScriptedJudge::new().with_relationships(vec![rel(b, a), rel(a, FindingId::now_v7())]),
        );
        let resolver = DuplicateResolver::new(judge.clone(), Duration::from_secs(1));

        let outcome = resolver.resolve(&findings).await;
        assert_eq!(outcome.relationships, vec![rel(b, a)]);
        assert_eq!(outcome.dropped_count(), 1);
        assert!(outcome.error.is_none());
        assert_eq!(judge.compare_calls(), 1);
    }

    #[tokio::test]
    async fn test_resolve_counts_non_uuid_ids_as_unknown() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let (a, b) = (findings[0].id, findings[1].id);
        let answer = format!(
            r#"{{"duplicates": [
                {{"findingId": "{b}", "duplicateOf": "{a}", "explanation": "same bug"}},
                {{"findingId": "finding-2", "duplicateOf": "{a}", "explanation": "made up"}}
            ]}}"#
        );
        let parsed = arbiter_llm::parse::parse_relationships("scripted", &answer).unwrap();
        let judge = Arc::new(ScriptedJudge::new().with_relationships(parsed));
        let resolver = DuplicateResolver::new(judge, Duration::from_secs(1));

        let outcome = resolver.resolve(&findings).await;
        assert_eq!(outcome.relationships, vec![rel(b, a)]);
        assert_eq!(outcome.dropped_count(), 1);
        assert_eq!(outcome.dropped[0].reason, DropReason::UnknownFinding);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use arbiter_test_utils::generators;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: accepted duplicate ids and original ids never overlap
        #[test]
        fn prop_partition_holds(
            (findings, candidates) in generators::arb_findings_with_relationships(12)
        ) {
            let (kept, dropped) = validate_relationships(&findings, candidates.clone());
            let outcome = ResolveOutcome { relationships: kept, dropped, error: None };

            let originals = outcome.original_ids();
            let duplicates = outcome.duplicate_ids();
            prop_assert!(originals.is_disjoint(&duplicates));
            prop_assert_eq!(outcome.relationships.len() + outcome.dropped_count(), candidates.len());
        }

        /// Property: each duplicate has exactly one accepted original
        #[test]
        fn prop_single_original_per_duplicate(
            (findings, candidates) in generators::arb_findings_with_relationships(12)
        ) {
            let (kept, _) = validate_relationships(&findings, candidates);
            let mut seen = HashSet::new();
            for rel in &kept {
                prop_assert!(seen.insert(rel.finding_id));
            }
        }
    }
}
